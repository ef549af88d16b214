//! Per-table build behavior selected by table name.

use cdm_model::{Column, RowBatch, TableDefinition};
use cdm_transform::ColumnOperation;
use tracing::debug;

/// How an auto-filled column is derived from its source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    Date,
    Year,
    Month,
    Day,
    Copy,
}

/// Fills `target` from `source` when `target` is entirely null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoFill {
    pub target: &'static str,
    pub source: &'static str,
    pub derivation: Derivation,
}

const fn fill(target: &'static str, source: &'static str, derivation: Derivation) -> AutoFill {
    AutoFill {
        target,
        source,
        derivation,
    }
}

const fn date(target: &'static str, source: &'static str) -> AutoFill {
    fill(target, source, Derivation::Date)
}

impl AutoFill {
    /// Derived column, or `None` when the fill does not apply to `batch`.
    pub fn derive(&self, batch: &RowBatch) -> Option<Column> {
        let target = batch.column_ci(self.target)?;
        if !target.is_all_null() {
            return None;
        }
        let source = batch.column_ci(self.source)?;
        if source.is_all_null() {
            return None;
        }
        let derived = match self.derivation {
            Derivation::Date => ColumnOperation::DateFromTimestamp.apply(source),
            Derivation::Year => ColumnOperation::ExtractYear.apply(source),
            Derivation::Month => ColumnOperation::ExtractMonth.apply(source),
            Derivation::Day => ColumnOperation::ExtractDay.apply(source),
            Derivation::Copy => source.clone(),
        };
        Some(derived.renamed(target.name.clone()))
    }
}

const PERSON_FILLS: &[AutoFill] = &[
    fill("year_of_birth", "birth_datetime", Derivation::Year),
    fill("month_of_birth", "birth_datetime", Derivation::Month),
    fill("day_of_birth", "birth_datetime", Derivation::Day),
];

const VISIT_FILLS: &[AutoFill] = &[
    date("visit_start_date", "visit_start_datetime"),
    date("visit_end_date", "visit_end_datetime"),
    fill("visit_end_date", "visit_start_date", Derivation::Copy),
];

const CONDITION_FILLS: &[AutoFill] = &[
    date("condition_start_date", "condition_start_datetime"),
    date("condition_end_date", "condition_end_datetime"),
];

// Order matters: the end date falls back to the start date only after both
// have had a chance to come from their timestamps.
const DRUG_FILLS: &[AutoFill] = &[
    date("drug_exposure_start_date", "drug_exposure_start_datetime"),
    date("drug_exposure_end_date", "drug_exposure_end_datetime"),
    fill("drug_exposure_end_date", "drug_exposure_start_date", Derivation::Copy),
];

const PROCEDURE_FILLS: &[AutoFill] = &[
    date("procedure_date", "procedure_datetime"),
    date("procedure_end_date", "procedure_end_datetime"),
];

const DEVICE_FILLS: &[AutoFill] = &[
    date("device_exposure_start_date", "device_exposure_start_datetime"),
    date("device_exposure_end_date", "device_exposure_end_datetime"),
];

const MEASUREMENT_FILLS: &[AutoFill] = &[date("measurement_date", "measurement_datetime")];
const OBSERVATION_FILLS: &[AutoFill] = &[date("observation_date", "observation_datetime")];
const DEATH_FILLS: &[AutoFill] = &[date("death_date", "death_datetime")];
const SPECIMEN_FILLS: &[AutoFill] = &[date("specimen_date", "specimen_datetime")];

/// Table-specific overrides applied while an instance is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStrategy {
    /// Fill an entirely null primary key with a dense sequence.
    pub synthesize_primary_key: bool,
    pub auto_fill: &'static [AutoFill],
}

impl Default for TableStrategy {
    fn default() -> Self {
        Self {
            synthesize_primary_key: true,
            auto_fill: &[],
        }
    }
}

impl TableStrategy {
    pub fn for_table(name: &str) -> Self {
        let auto_fill = match name.to_ascii_lowercase().as_str() {
            "person" => PERSON_FILLS,
            "visit_occurrence" => VISIT_FILLS,
            "condition_occurrence" => CONDITION_FILLS,
            "drug_exposure" => DRUG_FILLS,
            "procedure_occurrence" => PROCEDURE_FILLS,
            "device_exposure" => DEVICE_FILLS,
            "measurement" => MEASUREMENT_FILLS,
            "observation" => OBSERVATION_FILLS,
            "death" => DEATH_FILLS,
            "specimen" => SPECIMEN_FILLS,
            _ => &[],
        };
        Self {
            synthesize_primary_key: true,
            auto_fill,
        }
    }

    pub fn without_key_synthesis(mut self) -> Self {
        self.synthesize_primary_key = false;
        self
    }

    /// Whether this table gets a synthesized key under `definition`.
    pub fn synthesizes_key(&self, definition: &TableDefinition) -> bool {
        self.synthesize_primary_key && definition.primary_key().is_some()
    }

    /// Runs every applicable fill in order. Returns the filled column names.
    pub fn apply_auto_fill(&self, table: &str, batch: &mut RowBatch) -> cdm_model::Result<Vec<String>> {
        let mut filled = Vec::new();
        for rule in self.auto_fill {
            if let Some(column) = rule.derive(batch) {
                debug!(table, target = rule.target, source = rule.source, "auto-filled column");
                filled.push(column.name.clone());
                batch.replace_column(column)?;
            }
        }
        Ok(filled)
    }
}
