use std::path::PathBuf;

use thiserror::Error;

use cdm_ingest::IngestError;
use cdm_model::CdmError;
use cdm_standards::StandardsError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by sink implementations.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{sink} sink failed for table '{table}': {source}")]
    Backend {
        sink: &'static str,
        table: String,
        #[source]
        source: BoxError,
    },

    #[error("header of {path} does not match: expected [{expected}], found [{found}]")]
    HeaderMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error(
        "primary key continuity broken for '{table}': first new key {first_new} is not above stored maximum {stored_max}"
    )]
    KeyContinuity {
        table: String,
        stored_max: i64,
        first_new: i64,
    },

    #[error("job submission failed for '{table}': {message}")]
    JobSubmit { table: String, message: String },

    #[error(transparent)]
    Model(#[from] CdmError),
}

impl SinkError {
    pub fn backend(
        sink: &'static str,
        table: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        SinkError::Backend {
            sink,
            table: table.into(),
            source: source.into(),
        }
    }
}

/// Anything that can stop or degrade a mapping run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Model(#[from] CdmError),

    #[error(transparent)]
    Standards(#[from] StandardsError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl RunError {
    /// Whether the run must stop. Instance-level mapping errors are skipped
    /// for the current chunk; everything touching identity, cursors or
    /// persistence is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            RunError::Model(err) => err.is_fatal(),
            RunError::Ingest(IngestError::Model(err)) => err.is_fatal(),
            RunError::Standards(_) | RunError::Ingest(_) | RunError::Sink(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;
