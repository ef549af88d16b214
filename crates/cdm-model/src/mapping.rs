//! Declarative mapping rules as they appear in a rule document.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Field name -> rule, for one rule set of one target table.
pub type RuleSet = BTreeMap<String, MappingRule>;

/// How a copied source column is rewritten after its operations run.
#[derive(Debug, Clone, PartialEq)]
pub enum TermMapping {
    /// Per-value lookup keyed by canonical source text; unmapped values become null.
    Map(BTreeMap<String, Value>),
    /// Overwrites every row with one value.
    Constant(Value),
}

impl TryFrom<serde_json::Value> for TermMapping {
    type Error = String;

    fn try_from(raw: serde_json::Value) -> Result<Self, Self::Error> {
        match raw {
            serde_json::Value::Object(map) => Ok(TermMapping::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(&v)))
                    .collect(),
            )),
            serde_json::Value::Array(_) => {
                Err("term_mapping must be an object or a scalar".to_string())
            }
            scalar => Ok(TermMapping::Constant(Value::from_json(&scalar))),
        }
    }
}

impl From<TermMapping> for serde_json::Value {
    fn from(mapping: TermMapping) -> Self {
        match mapping {
            TermMapping::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, value_to_json(&v)))
                    .collect(),
            ),
            TermMapping::Constant(v) => value_to_json(&v),
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        other => serde_json::Value::String(other.canonical()),
    }
}

impl Serialize for TermMapping {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TermMapping {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        TermMapping::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub source_table: String,
    pub source_field: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_mapping: Option<TermMapping>,
}

impl MappingRule {
    pub fn new(source_table: impl Into<String>, source_field: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            source_field: source_field.into(),
            operations: Vec::new(),
            term_mapping: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operations.push(operation.into());
        self
    }

    pub fn with_term_mapping(mut self, mapping: TermMapping) -> Self {
        self.term_mapping = Some(mapping);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default)]
    pub dataset: String,
    #[serde(default)]
    pub date_created: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `{metadata, cdm: table -> rule set -> field -> rule}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub metadata: RuleMetadata,
    #[serde(default)]
    pub cdm: BTreeMap<String, BTreeMap<String, RuleSet>>,
}

impl RuleDocument {
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.cdm.keys().map(String::as_str)
    }

    pub fn rule_sets(&self, table: &str) -> Option<&BTreeMap<String, RuleSet>> {
        self.cdm.get(table)
    }

    /// Every source table referenced by any rule.
    pub fn source_tables(&self) -> BTreeSet<&str> {
        self.cdm
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(|rule| rule.source_table.as_str())
            .collect()
    }

    /// Source tables referenced by the rules of one target table.
    pub fn source_tables_for(&self, table: &str) -> BTreeSet<&str> {
        self.cdm
            .get(table)
            .into_iter()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(|rule| rule.source_table.as_str())
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.cdm
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }
}
