//! Persistence boundary for finished target batches.
//!
//! A [`Sink`] receives one batch per table per chunk together with a
//! [`WriteMode`], and can report previously persisted state back to the
//! orchestrator so a run can continue where an earlier one stopped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use cdm_model::{RowBatch, RunLog};

use crate::error::SinkError;
use crate::masker::{MASK_TABLE, identifier_map_from_batch};

/// How a batch is combined with what the sink already holds for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace whatever the sink holds for the table.
    Create,
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Create => write!(f, "create"),
            WriteMode::Append => write!(f, "append"),
        }
    }
}

/// Where a write ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub rows: usize,
}

impl Location {
    pub fn new(uri: impl Into<String>, rows: usize) -> Self {
        Self {
            uri: uri.into(),
            rows,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} rows)", self.uri, self.rows)
    }
}

/// Returned by [`Sink::finalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    /// Rows accepted per table, as far as the sink can tell.
    pub rows: BTreeMap<String, usize>,
    /// Partial failures that did not abort the run.
    pub warnings: Vec<String>,
}

impl SinkReport {
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub trait Sink {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn write(
        &mut self,
        table: &str,
        batch: &RowBatch,
        mode: WriteMode,
    ) -> Result<Location, SinkError>;

    /// Flushes pending work. Called once at the end of every run, including
    /// runs that stop on a fatal error.
    fn finalize(&mut self) -> Result<SinkReport, SinkError>;

    /// Identifier mask persisted by earlier runs, if any.
    fn load_existing_identifier_map(&mut self) -> Result<Option<BTreeMap<String, i64>>, SinkError>;

    /// Rows already persisted per table, if any.
    fn load_existing_row_counts(&mut self) -> Result<Option<BTreeMap<String, usize>>, SinkError>;

    fn persist_run_log(&mut self, log: &RunLog) -> Result<Location, SinkError>;
}

/// Keeps everything in memory. Used by analyses and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: BTreeMap<String, RowBatch>,
    writes: Vec<(String, WriteMode, usize)>,
    run_logs: Vec<RunLog>,
    finalized: usize,
    failing: BTreeSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table as if an earlier run had written it.
    pub fn with_table(mut self, name: impl Into<String>, batch: RowBatch) -> Self {
        self.tables.insert(name.into(), batch);
        self
    }

    /// Rejects every write to `name` until [`MemorySink::clear_failures`].
    pub fn with_failing_table(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    pub fn table(&self, name: &str) -> Option<&RowBatch> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> &BTreeMap<String, RowBatch> {
        &self.tables
    }

    pub fn into_tables(self) -> BTreeMap<String, RowBatch> {
        self.tables
    }

    /// `(table, mode, rows)` for every write, in order.
    pub fn writes(&self) -> &[(String, WriteMode, usize)] {
        &self.writes
    }

    pub fn run_logs(&self) -> &[RunLog] {
        &self.run_logs
    }

    pub fn finalize_count(&self) -> usize {
        self.finalized
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(
        &mut self,
        table: &str,
        batch: &RowBatch,
        mode: WriteMode,
    ) -> Result<Location, SinkError> {
        if self.failing.contains(table) {
            return Err(SinkError::backend("memory", table, "write rejected"));
        }
        let stored = match (mode, self.tables.remove(table)) {
            (WriteMode::Append, Some(existing)) if !existing.is_empty() => {
                RowBatch::concat(vec![existing, batch.clone()])?
            }
            _ => batch.clone(),
        };
        self.tables.insert(table.to_string(), stored);
        self.writes.push((table.to_string(), mode, batch.height()));
        Ok(Location::new(format!("memory://{table}"), batch.height()))
    }

    fn finalize(&mut self) -> Result<SinkReport, SinkError> {
        self.finalized += 1;
        let rows = self
            .tables
            .iter()
            .map(|(name, batch)| (name.clone(), batch.height()))
            .collect();
        Ok(SinkReport {
            rows,
            warnings: Vec::new(),
        })
    }

    fn load_existing_identifier_map(&mut self) -> Result<Option<BTreeMap<String, i64>>, SinkError> {
        self.tables
            .get(MASK_TABLE)
            .map(identifier_map_from_batch)
            .transpose()
            .map_err(SinkError::from)
    }

    fn load_existing_row_counts(&mut self) -> Result<Option<BTreeMap<String, usize>>, SinkError> {
        if self.tables.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            self.tables
                .iter()
                .filter(|(name, _)| name.as_str() != MASK_TABLE)
                .map(|(name, batch)| (name.clone(), batch.height()))
                .collect(),
        ))
    }

    fn persist_run_log(&mut self, log: &RunLog) -> Result<Location, SinkError> {
        self.run_logs.push(log.clone());
        Ok(Location::new("memory://run_log", 1))
    }
}
