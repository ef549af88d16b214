//! Deterministic pseudonymization of subject identifiers.

use std::collections::BTreeMap;

use cdm_model::{CdmError, Column, RowBatch, Value};

/// State table holding the identifier mask.
pub const MASK_TABLE: &str = "person_ids";
pub const SOURCE_SUBJECT: &str = "SOURCE_SUBJECT";
pub const TARGET_SUBJECT: &str = "TARGET_SUBJECT";

/// Maps original identifiers (canonical text) onto dense integers.
///
/// Entries are only ever added, and each new entry takes the next integer,
/// so no two identifiers share a masked value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierMasker {
    forward: BTreeMap<String, i64>,
    next: i64,
    pending: Vec<(String, i64)>,
}

impl IdentifierMasker {
    pub fn new(start_index: i64) -> Self {
        Self {
            forward: BTreeMap::new(),
            next: start_index,
            pending: Vec::new(),
        }
    }

    /// Continues from a persisted mask; numbering resumes after its largest value.
    pub fn from_existing(existing: BTreeMap<String, i64>, start_index: i64) -> Self {
        let next = existing
            .values()
            .max()
            .map_or(start_index, |max| (max + 1).max(start_index));
        Self {
            forward: existing,
            next,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Value the next new identifier will receive.
    pub fn next_value(&self) -> i64 {
        self.next
    }

    pub fn mask(&self, identifier: &str) -> Option<i64> {
        self.forward.get(identifier).copied()
    }

    /// Assigns the next value to an unseen identifier. An identifier that is
    /// already masked cannot be assigned again.
    pub fn extend(&mut self, identifier: &str) -> Result<i64, CdmError> {
        if let Some(existing) = self.forward.get(identifier) {
            return Err(CdmError::DuplicateIdentity {
                identifier: identifier.to_string(),
                existing: *existing,
                proposed: self.next,
            });
        }
        let masked = self.next;
        self.forward.insert(identifier.to_string(), masked);
        self.pending.push((identifier.to_string(), masked));
        self.next += 1;
        Ok(masked)
    }

    /// Entries added since the last call, in assignment order.
    pub fn take_new(&mut self) -> Vec<(String, i64)> {
        std::mem::take(&mut self.pending)
    }

    pub fn entries(&self) -> &BTreeMap<String, i64> {
        &self.forward
    }
}

/// Outcome of masking the identifier column of a dependent table.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedBatch {
    pub batch: RowBatch,
    /// Rows dropped because their identifier was never masked.
    pub orphaned: usize,
    /// Which input rows were kept.
    pub kept: Vec<bool>,
}

/// Replaces every identifier in `field` with its masked value and drops rows
/// whose identifier is unknown.
pub fn mask_dependent(
    masker: &IdentifierMasker,
    batch: &RowBatch,
    field: &str,
) -> Result<MaskedBatch, CdmError> {
    let Some(column) = batch.column(field) else {
        return Ok(MaskedBatch {
            batch: batch.clone(),
            orphaned: 0,
            kept: vec![true; batch.height()],
        });
    };
    let masked: Vec<Option<i64>> = column
        .values
        .iter()
        .map(|v| {
            if v.is_null() {
                None
            } else {
                masker.mask(&v.canonical())
            }
        })
        .collect();
    let keep: Vec<bool> = masked.iter().map(Option::is_some).collect();
    let orphaned = keep.iter().filter(|k| !**k).count();
    let values = masked.into_iter().flatten().map(Value::Int).collect();
    let mut masked_batch = batch.filter(&keep)?;
    masked_batch.replace_column(Column::new(field, values))?;
    Ok(MaskedBatch {
        batch: masked_batch,
        orphaned,
        kept: keep,
    })
}

/// Mask entries as a two-column batch for the state table.
pub fn mask_entries_batch(entries: &[(String, i64)]) -> Result<RowBatch, CdmError> {
    RowBatch::new(vec![
        Column::new(
            SOURCE_SUBJECT,
            entries.iter().map(|(k, _)| Value::Text(k.clone())).collect(),
        ),
        Column::new(
            TARGET_SUBJECT,
            entries.iter().map(|(_, v)| Value::Int(*v)).collect(),
        ),
    ])
}

/// Reads a persisted mask table back into a map.
pub fn identifier_map_from_batch(batch: &RowBatch) -> Result<BTreeMap<String, i64>, CdmError> {
    let missing = |name: &str| CdmError::BadInputs(format!("mask table lacks column {name}"));
    let sources = batch
        .column_ci(SOURCE_SUBJECT)
        .ok_or_else(|| missing(SOURCE_SUBJECT))?;
    let targets = batch
        .column_ci(TARGET_SUBJECT)
        .ok_or_else(|| missing(TARGET_SUBJECT))?;
    let mut map = BTreeMap::new();
    for (source, target) in sources.values.iter().zip(&targets.values) {
        if source.is_null() {
            continue;
        }
        let masked = target.as_i64().ok_or_else(|| {
            CdmError::BadInputs(format!(
                "mask table value '{}' for '{}' is not an integer",
                target.canonical(),
                source.canonical()
            ))
        })?;
        map.insert(source.canonical(), masked);
    }
    Ok(map)
}
