use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building target tables from mapping rules.
#[derive(Debug, Error)]
pub enum CdmError {
    #[error("unknown table '{table}' in schema version {version}")]
    UnknownTable { table: String, version: String },

    #[error("unknown schema version '{version}' (available: {available})")]
    UnknownVersion { version: String, available: String },

    #[error("source table '{table}' not found in the active inputs")]
    SourceTableNotFound { table: String },

    #[error("source field '{field}' not found in source table '{table}'")]
    SourceFieldNotFound { table: String, field: String },

    #[error("row count mismatch in {context}: expected {expected} rows, found {found}")]
    RowCountMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("formatting failed for {table}.{field}: {message}")]
    FormattingError {
        table: String,
        field: String,
        message: String,
    },

    #[error(
        "{table}.{field} does not conform to {logical_type}: {failures} of {sampled} sampled values failed"
    )]
    DataStandardError {
        table: String,
        field: String,
        logical_type: String,
        failures: usize,
        sampled: usize,
    },

    #[error("identifier '{identifier}' is already masked as {existing}, refusing to remap to {proposed}")]
    DuplicateIdentity {
        identifier: String,
        existing: i64,
        proposed: i64,
    },

    #[error("bad inputs: {0}")]
    BadInputs(String),

    #[error("missing input files: {}", missing.join(", "))]
    MissingInputFiles { missing: Vec<String> },

    #[error("unknown column operation '{0}'")]
    UnknownOperation(String),

    #[error("unknown logical type '{0}'")]
    UnknownLogicalType(String),

    #[error("invalid mapping rules: {0}")]
    InvalidRules(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame operation failed: {0}")]
    Frame(String),

    #[error("invalid run configuration: {0}")]
    Config(String),
}

impl CdmError {
    /// Errors that must abort the whole run instead of skipping one instance.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CdmError::DuplicateIdentity { .. }
                | CdmError::MissingInputFiles { .. }
                | CdmError::BadInputs(_)
                | CdmError::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CdmError>;
