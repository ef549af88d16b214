//! Loading, validating and diffing rule documents.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use cdm_model::{CdmError, RuleDocument, RuleSet};
use cdm_transform::ColumnOperation;

pub fn parse_rules(raw: &str) -> Result<RuleDocument, CdmError> {
    let document: RuleDocument =
        serde_json::from_str(raw).map_err(|err| CdmError::InvalidRules(err.to_string()))?;
    validate_rules(&document)?;
    Ok(document)
}

pub fn load_rules(path: &Path) -> Result<RuleDocument, CdmError> {
    let raw = fs::read_to_string(path).map_err(|source| CdmError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: RuleDocument = serde_json::from_str(&raw).map_err(|source| CdmError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    validate_rules(&document)?;
    Ok(document)
}

pub fn save_rules(path: &Path, document: &RuleDocument) -> Result<(), CdmError> {
    let json = serde_json::to_string_pretty(document).map_err(|source| CdmError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| CdmError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Rejects rules with blank source names or operations no resolver knows.
pub fn validate_rules(document: &RuleDocument) -> Result<(), CdmError> {
    for (table, rule_sets) in &document.cdm {
        for (rule_set, rules) in rule_sets {
            if rules.is_empty() {
                return Err(CdmError::InvalidRules(format!(
                    "{table}/{rule_set} has no field rules"
                )));
            }
            for (field, rule) in rules {
                if rule.source_table.trim().is_empty() || rule.source_field.trim().is_empty() {
                    return Err(CdmError::InvalidRules(format!(
                        "{table}/{rule_set}/{field} is missing source_table or source_field"
                    )));
                }
                for op in &rule.operations {
                    op.parse::<ColumnOperation>()?;
                }
            }
        }
    }
    Ok(())
}

/// Rule sets in `current` that are absent from, or differ from, `previous`.
///
/// Used to map only what changed since an earlier rule document was processed.
pub fn delta(current: &RuleDocument, previous: &RuleDocument) -> RuleDocument {
    let mut cdm: BTreeMap<String, BTreeMap<String, RuleSet>> = BTreeMap::new();
    for (table, rule_sets) in &current.cdm {
        for (name, rules) in rule_sets {
            let unchanged = previous
                .cdm
                .get(table)
                .and_then(|old| old.get(name))
                .is_some_and(|old| old == rules);
            if !unchanged {
                cdm.entry(table.clone())
                    .or_default()
                    .insert(name.clone(), rules.clone());
            }
        }
    }
    RuleDocument {
        metadata: current.metadata.clone(),
        cdm,
    }
}

/// Keeps only the named target tables, ignoring case.
pub fn filter_tables<S: AsRef<str>>(document: &RuleDocument, tables: &[S]) -> RuleDocument {
    let cdm = document
        .cdm
        .iter()
        .filter(|(name, _)| tables.iter().any(|t| t.as_ref().eq_ignore_ascii_case(name)))
        .map(|(name, sets)| (name.clone(), sets.clone()))
        .collect();
    RuleDocument {
        metadata: document.metadata.clone(),
        cdm,
    }
}
