//! Per-run bookkeeping persisted next to the mapped tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequiredCount {
    pub before: usize,
    pub after: usize,
}

impl RequiredCount {
    pub fn dropped(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSetLog {
    /// Required field -> rows before and after null rows were dropped.
    pub required: BTreeMap<String, RequiredCount>,
    /// Rows dropped because a required value failed type coercion.
    pub formatting_dropped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableLog {
    /// Rows the sink already held when the run started.
    pub existing_rows: usize,
    pub rows_written: usize,
    pub chunks: usize,
    pub duplicates_dropped: usize,
    pub orphaned_rows: usize,
    /// Identity rows dropped because their identifier was null.
    #[serde(default)]
    pub missing_identifiers: usize,
    pub rule_sets: BTreeMap<String, RuleSetLog>,
    pub locations: Vec<String>,
}

impl TableLog {
    pub fn error_count(&self) -> usize {
        self.rule_sets.values().map(|r| r.errors.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub dataset: String,
    pub cdm_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub new_identifiers: usize,
    pub tables: BTreeMap<String, TableLog>,
    pub warnings: Vec<String>,
    pub aborted: Option<String>,
}

impl RunLog {
    pub fn new(dataset: impl Into<String>, cdm_version: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            cdm_version: cdm_version.into(),
            started_at: Utc::now(),
            finished_at: None,
            new_identifiers: 0,
            tables: BTreeMap::new(),
            warnings: Vec::new(),
            aborted: None,
        }
    }

    pub fn table_mut(&mut self, table: &str) -> &mut TableLog {
        self.tables.entry(table.to_string()).or_default()
    }

    pub fn table(&self, table: &str) -> Option<&TableLog> {
        self.tables.get(table)
    }

    /// Seeds row counts already persisted by the sink.
    pub fn seed_existing(&mut self, counts: &BTreeMap<String, usize>) {
        for (table, rows) in counts {
            self.table_mut(table).existing_rows = *rows;
        }
    }

    /// Next primary key for `table` so numbering continues across chunks and runs.
    pub fn next_index(&self, table: &str, start_index: i64) -> i64 {
        let written = self
            .tables
            .get(table)
            .map_or(0, |t| t.existing_rows + t.rows_written);
        start_index + i64::try_from(written).unwrap_or(i64::MAX - start_index)
    }

    pub fn record_written(&mut self, table: &str, rows: usize, location: String) {
        let log = self.table_mut(table);
        log.rows_written += rows;
        log.locations.push(location);
    }

    pub fn total_rows_written(&self) -> usize {
        self.tables.values().map(|t| t.rows_written).sum()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
