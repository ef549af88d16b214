use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CaseInsensitiveSet {
    map: HashMap<String, String>,
}

impl CaseInsensitiveSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for name in names {
            let name = name.as_ref();
            map.entry(name.to_ascii_uppercase())
                .or_insert_with(|| name.to_string());
        }
        Self { map }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_uppercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_uppercase())
    }
}

/// Scan reports cut sheet names to the spreadsheet limit.
pub const TABLE_NAME_LIMIT: usize = 31;
pub const FIELD_NAME_LIMIT: usize = 50;

/// How a requested name was matched against the available names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact,
    CaseInsensitive,
    Truncated,
}

/// Finds `requested` among `available`: exact, then ignoring case, then by
/// comparing both names cut to `truncate_at` characters with any `.csv` or
/// `.tsv` extension removed.
pub fn resolve_name<'a, I>(
    requested: &str,
    available: I,
    truncate_at: usize,
) -> Option<(&'a str, NameMatch)>
where
    I: IntoIterator<Item = &'a str>,
{
    let available: Vec<&'a str> = available.into_iter().collect();
    if let Some(name) = available.iter().find(|n| **n == requested) {
        return Some((*name, NameMatch::Exact));
    }
    if let Some(name) = available
        .iter()
        .find(|n| n.eq_ignore_ascii_case(requested))
    {
        return Some((*name, NameMatch::CaseInsensitive));
    }
    let wanted = truncation_key(requested, truncate_at);
    available
        .iter()
        .find(|n| truncation_key(n, truncate_at) == wanted)
        .map(|name| (*name, NameMatch::Truncated))
}

fn truncation_key(name: &str, limit: usize) -> String {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();
    let stem = lower
        .strip_suffix(".csv")
        .or_else(|| lower.strip_suffix(".tsv"))
        .unwrap_or(&lower);
    stem.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_in_fallback_order() {
        let names = ["Demographics.csv", "demographics.csv", "Serology.csv"];
        assert_eq!(
            resolve_name("demographics.csv", names, 31),
            Some(("demographics.csv", NameMatch::Exact))
        );
        assert_eq!(
            resolve_name("SEROLOGY.CSV", names, 31),
            Some(("Serology.csv", NameMatch::CaseInsensitive))
        );
        assert_eq!(
            resolve_name("serology", names, 31),
            Some(("Serology.csv", NameMatch::Truncated))
        );
        assert_eq!(resolve_name("missing", names, 31), None);
    }

    #[test]
    fn truncated_sheet_names_match() {
        let names = ["Hospital_Admissions_And_Discharges_2021.csv"];
        let (found, how) =
            resolve_name("Hospital_Admissions_And_Dischar", names, 31).expect("truncated");
        assert_eq!(found, names[0]);
        assert_eq!(how, NameMatch::Truncated);
    }
}
