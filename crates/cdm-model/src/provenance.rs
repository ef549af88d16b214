#![deny(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lookup::NameMatch;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source table name as found in the active inputs.
    pub table: String,
    /// Source column name as found in that table.
    pub field: String,
}

/// Where one destination field came from and how the names were matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub source: SourceRef,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub operations: Vec<String>,
    pub term_mapped: bool,
    /// True when either name needed a case or truncation fallback.
    pub fuzzy_match: bool,
}

impl FieldProvenance {
    pub fn new(table: &str, field: &str, table_match: NameMatch, field_match: NameMatch) -> Self {
        Self {
            source: SourceRef {
                table: table.to_string(),
                field: field.to_string(),
            },
            operations: Vec::new(),
            term_mapped: false,
            fuzzy_match: table_match != NameMatch::Exact || field_match != NameMatch::Exact,
        }
    }
}

/// Destination field -> provenance for one built instance.
pub type ProvenanceMap = BTreeMap<String, FieldProvenance>;
