//! Run configuration threaded through the orchestrator, registry and sinks.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CdmError, Result};

/// What the formatter does after a target table is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatPolicy {
    /// Leave values as produced by the rules.
    Off,
    /// Coerce every non-key column to its logical type.
    #[default]
    On,
    /// Sample each column and fail when too many values do not conform.
    Check,
}

/// Options for one mapping run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Schema version to map into.
    pub cdm_version: String,

    /// Rows fetched per source per chunk. `None` reads each source whole.
    pub chunk_size: Option<usize>,

    /// First primary key and first masked identifier of a fresh run.
    pub start_index: i64,

    pub format_policy: FormatPolicy,

    /// Non-null values sampled per column in check mode.
    pub check_sample_size: usize,

    /// Fraction of sampled values allowed to fail in check mode.
    pub check_tolerance: f64,

    /// Continue from identifiers and row counts already held by the sink.
    pub resume: bool,

    /// Allow row values to appear in log output.
    pub log_data: bool,

    pub identity_table: String,

    /// Foreign key that links every other table to the identity table.
    pub identifier_field: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cdm_version: "5.3.1".to_string(),
            chunk_size: None,
            start_index: 1,
            format_policy: FormatPolicy::On,
            check_sample_size: 50,
            check_tolerance: 0.0,
            resume: false,
            log_data: false,
            identity_table: "person".to_string(),
            identifier_field: "person_id".to_string(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: RunConfig =
            toml::from_str(raw).map_err(|err| CdmError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| CdmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            return Err(CdmError::Config("chunk_size must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.check_tolerance) {
            return Err(CdmError::Config(format!(
                "check_tolerance must be within 0..=1, got {}",
                self.check_tolerance
            )));
        }
        if self.identity_table.trim().is_empty() || self.identifier_field.trim().is_empty() {
            return Err(CdmError::Config(
                "identity_table and identifier_field must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_cdm_version(mut self, version: impl Into<String>) -> Self {
        self.cdm_version = version.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_start_index(mut self, start_index: i64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn with_format_policy(mut self, policy: FormatPolicy) -> Self {
        self.format_policy = policy;
        self
    }

    pub fn with_check(mut self, sample_size: usize, tolerance: f64) -> Self {
        self.check_sample_size = sample_size;
        self.check_tolerance = tolerance;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_log_data(mut self, enabled: bool) -> Self {
        self.log_data = enabled;
        self
    }

    /// Size hint handed to every `fetch_next` call.
    pub fn fetch_size(&self) -> usize {
        self.chunk_size.unwrap_or(usize::MAX)
    }
}
