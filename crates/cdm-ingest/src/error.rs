//! Error types for chunked source ingestion.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    // === File System Errors ===
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source file not found: {path}")]
    FileNotFound { path: PathBuf },

    // === Parsing Errors ===
    #[error("failed to parse {path}: {message}")]
    CsvParse { path: PathBuf, message: String },

    #[error("query failed for source '{source_name}': {source}")]
    Sql {
        source_name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Model(#[from] cdm_model::CdmError),

    // === Cursor Protocol Errors ===
    #[error("duplicate source name '{name}'")]
    DuplicateSource { name: String },

    #[error("unknown source '{name}'")]
    UnknownSource { name: String },

    #[error("source '{name}' was advanced before it was initialized")]
    NotInitialized { name: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;
