//! Lenient date and timestamp parsing for source values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use cdm_model::Value;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d"];

/// Parses a timestamp; date-only inputs become midnight.
///
/// Accepts ISO 8601 with `T` or a space separator, optional fractional
/// seconds, a trailing `Z` or offset, and day-first `dd/mm/yyyy` forms.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    let value = value.strip_suffix('Z').unwrap_or(value);
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    parse_date_only(value).map(|d| d.and_time(NaiveTime::MIN))
}

fn parse_date_only(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Parses a calendar date, discarding any time component.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(d) = parse_date_only(value) {
        return Some(d);
    }
    // Timestamps carry a date prefix.
    if value.len() > 10 {
        let has_time = value
            .as_bytes()
            .get(10)
            .is_some_and(|b| *b == b' ' || *b == b'T');
        if has_time {
            return parse_timestamp(value).map(|dt| dt.date());
        }
    }
    None
}

pub fn value_to_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Date(d) => Some(d.and_time(NaiveTime::MIN)),
        Value::Text(s) => parse_timestamp(s),
        _ => None,
    }
}

pub fn value_to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Timestamp(ts) => Some(ts.date()),
        Value::Text(s) => parse_date(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_variants() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4)
            .and_then(|d| d.and_hms_opt(10, 30, 0))
            .expect("valid");
        assert_eq!(parse_timestamp("2021-03-04 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2021-03-04T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2021-03-04T10:30"), Some(expected));
        assert_eq!(parse_timestamp("04/03/2021 10:30"), Some(expected));
        assert_eq!(
            parse_timestamp("2021-03-04"),
            NaiveDate::from_ymd_opt(2021, 3, 4).map(|d| d.and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn date_drops_time() {
        let expected = NaiveDate::from_ymd_opt(1980, 12, 31);
        assert_eq!(parse_date("1980-12-31 23:59:59.123456"), expected);
        assert_eq!(parse_date("31/12/1980"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }
}
