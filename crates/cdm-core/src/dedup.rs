//! Content-hash deduplication of target rows.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use cdm_model::{CdmError, RowBatch, Value};

/// Hex sha256 over the canonical values of one row, skipping `exclude`d columns.
pub fn row_hash(batch: &RowBatch, idx: usize, exclude: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for column in batch.columns() {
        if exclude.iter().any(|name| column.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        hasher.update(column.name.as_bytes());
        hasher.update([0x1f]);
        match &column.values[idx] {
            // Null and empty text must hash differently.
            Value::Null => hasher.update([0x00]),
            value => {
                hasher.update([0x01]);
                hasher.update(value.canonical().as_bytes());
            }
        }
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

/// Rows removed from one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub batch: RowBatch,
    /// Positions in the input batch that were dropped.
    pub dropped: Vec<usize>,
}

/// Remembers the row hashes of one table for the length of a run, so a row
/// repeated in a later chunk is dropped the same as one repeated in the
/// current chunk.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    pub fn apply(&mut self, batch: &RowBatch, exclude: &[&str]) -> Result<DedupOutcome, CdmError> {
        let mut keep = Vec::with_capacity(batch.height());
        let mut dropped = Vec::new();
        for idx in 0..batch.height() {
            let fresh = self.seen.insert(row_hash(batch, idx, exclude));
            if !fresh {
                dropped.push(idx);
            }
            keep.push(fresh);
        }
        let batch = batch.filter(&keep)?;
        Ok(DedupOutcome { batch, dropped })
    }
}

/// Drops repeated rows within a single batch.
pub fn dedup_batch(batch: &RowBatch, exclude: &[&str]) -> Result<DedupOutcome, CdmError> {
    Deduplicator::new().apply(batch, exclude)
}
