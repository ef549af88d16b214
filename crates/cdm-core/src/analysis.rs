//! Post-run analyses over a fully materialized model.
//!
//! Analyses are independent: each one reads the model and produces its own
//! result. [`run_analyses`] spreads them over a fixed number of worker
//! threads and collects every result, failed or not.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use serde::Serialize;
use tracing::{debug, warn};

use cdm_model::{CdmError, TableSet};

/// Label and count pairs produced by one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub name: String,
    pub counts: Vec<(String, usize)>,
}

pub trait Analysis: Send + Sync {
    fn name(&self) -> String;

    fn run(&self, model: &dyn TableSet) -> Result<AnalysisResult, CdmError>;
}

/// Rows per table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCountAnalysis;

impl Analysis for RowCountAnalysis {
    fn name(&self) -> String {
        "row_counts".to_string()
    }

    fn run(&self, model: &dyn TableSet) -> Result<AnalysisResult, CdmError> {
        let counts = model
            .table_names()
            .into_iter()
            .map(|name| {
                let rows = model.table(name).map_or(0, |t| t.height());
                (name.to_string(), rows)
            })
            .collect();
        Ok(AnalysisResult {
            name: self.name(),
            counts,
        })
    }
}

/// Occurrences of each distinct value of one field, most frequent first.
#[derive(Debug, Clone)]
pub struct ValueFrequencyAnalysis {
    pub table: String,
    pub field: String,
    pub limit: Option<usize>,
}

impl ValueFrequencyAnalysis {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Analysis for ValueFrequencyAnalysis {
    fn name(&self) -> String {
        format!("frequency:{}.{}", self.table, self.field)
    }

    fn run(&self, model: &dyn TableSet) -> Result<AnalysisResult, CdmError> {
        let table = model
            .table(&self.table)
            .ok_or_else(|| CdmError::SourceTableNotFound {
                table: self.table.clone(),
            })?;
        let column = table
            .column_ci(&self.field)
            .ok_or_else(|| CdmError::SourceFieldNotFound {
                table: self.table.clone(),
                field: self.field.clone(),
            })?;
        let mut frequencies: BTreeMap<String, usize> = BTreeMap::new();
        for value in column.values.iter().filter(|v| !v.is_null()) {
            *frequencies.entry(value.canonical()).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = frequencies.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = self.limit {
            counts.truncate(limit);
        }
        Ok(AnalysisResult {
            name: self.name(),
            counts,
        })
    }
}

/// Outcome of one analysis run by the pool.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub name: String,
    pub result: Result<AnalysisResult, CdmError>,
}

/// Runs every analysis on a pool of `workers` threads (at least one).
/// Outcomes are returned in the order the analyses were given.
pub fn run_analyses(
    model: &(dyn TableSet + Sync),
    analyses: &[Box<dyn Analysis>],
    workers: usize,
) -> Vec<AnalysisOutcome> {
    let workers = workers.clamp(1, analyses.len().max(1));
    let next = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel();

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let sender = sender.clone();
            let next = &next;
            scope.spawn(move || {
                loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(analysis) = analyses.get(idx) else {
                        break;
                    };
                    let name = analysis.name();
                    debug!(worker, analysis = %name, "running analysis");
                    let result = analysis.run(model);
                    if let Err(err) = &result {
                        warn!(analysis = %name, error = %err, "analysis failed");
                    }
                    if sender.send((idx, AnalysisOutcome { name, result })).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(sender);

    let mut outcomes: Vec<(usize, AnalysisOutcome)> = receiver.into_iter().collect();
    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

#[cfg(test)]
mod tests {
    use cdm_model::{Column, RowBatch, Value};

    use super::*;

    fn model() -> BTreeMap<String, RowBatch> {
        let person = RowBatch::new(vec![Column::new(
            "gender_concept_id",
            vec![Value::Int(8507), Value::Int(8532), Value::Int(8507), Value::Null],
        )])
        .expect("batch");
        BTreeMap::from([("person".to_string(), person)])
    }

    #[test]
    fn outcomes_keep_input_order() {
        let analyses: Vec<Box<dyn Analysis>> = vec![
            Box::new(ValueFrequencyAnalysis::new("person", "gender_concept_id")),
            Box::new(RowCountAnalysis),
            Box::new(ValueFrequencyAnalysis::new("missing", "x")),
        ];
        let outcomes = run_analyses(&model(), &analyses, 4);
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["frequency:person.gender_concept_id", "row_counts", "frequency:missing.x"]
        );
        let frequency = outcomes[0].result.as_ref().expect("frequency");
        assert_eq!(
            frequency.counts,
            vec![("8507".to_string(), 2), ("8532".to_string(), 1)]
        );
        assert!(matches!(
            outcomes[2].result,
            Err(CdmError::SourceTableNotFound { .. })
        ));
    }
}
