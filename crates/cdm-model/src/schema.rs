use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CdmError;

/// Storage type of a target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Integer,
    Float,
    /// Fixed-width text; `None` means unbounded (`VARCHAR(MAX)`).
    Text { max_len: Option<usize> },
    Timestamp,
    Date,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Integer => f.write_str("INTEGER"),
            LogicalType::Float => f.write_str("FLOAT"),
            LogicalType::Text { max_len: Some(n) } => write!(f, "VARCHAR({n})"),
            LogicalType::Text { max_len: None } => f.write_str("VARCHAR(MAX)"),
            LogicalType::Timestamp => f.write_str("DATETIME"),
            LogicalType::Date => f.write_str("DATE"),
        }
    }
}

impl FromStr for LogicalType {
    type Err = CdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(' ', "");
        let parsed = match normalized.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" => LogicalType::Integer,
            "FLOAT" | "REAL" | "DOUBLE" => LogicalType::Float,
            "DATETIME" | "DATETIME2" | "TIMESTAMP" => LogicalType::Timestamp,
            "DATE" => LogicalType::Date,
            "TEXT" | "VARCHAR(MAX)" => LogicalType::Text { max_len: None },
            other if other.starts_with("NUMERIC") || other.starts_with("DECIMAL") => {
                LogicalType::Float
            }
            other => {
                let inner = other
                    .strip_prefix("VARCHAR(")
                    .or_else(|| other.strip_prefix("CHAR("))
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| CdmError::UnknownLogicalType(s.to_string()))?;
                let max_len = inner
                    .parse()
                    .map_err(|_| CdmError::UnknownLogicalType(s.to_string()))?;
                LogicalType::Text {
                    max_len: Some(max_len),
                }
            }
        };
        Ok(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub logical_type: LogicalType,
    pub required: bool,
    pub is_primary_key: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            required: false,
            is_primary_key: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.required = true;
        self
    }
}

/// Ordered field list of one target table in one schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub is_identity: bool,
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            is_identity: false,
            description: None,
            fields,
        }
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.required)
    }
}
