//! Sequences table production for one mapping run.
//!
//! The identity table is processed first so its identifier mask exists
//! before any dependent table is read. Each table is streamed chunk by
//! chunk: build every instance, stack the results, mask identifiers, drop
//! duplicates, number synthesized keys and hand the batch to the sink.
//!
//! Per-instance mapping errors skip that instance for the current chunk.
//! Identity conflicts, cursor protocol errors and sink failures stop the
//! run, but the sink is still finalized and the run log persisted.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use cdm_ingest::{Advance, SourceCollection};
use cdm_model::{CdmError, Column, RowBatch, RuleDocument, RunConfig, RunLog, Value};
use cdm_standards::SchemaVersion;

use crate::builder::{TablePlan, plan_tables};
use crate::dedup::Deduplicator;
use crate::error::{Result, RunError};
use crate::instance::BuildOptions;
use crate::masker::{IdentifierMasker, MASK_TABLE, mask_dependent, mask_entries_batch};
use crate::sink::{Sink, SinkReport, WriteMode};

const DUPLICATE_SAMPLE: usize = 5;

/// Per-table totals of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub rows_written: usize,
    pub chunks: usize,
    pub duplicates_dropped: usize,
    pub orphaned_rows: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_log: RunLog,
    pub sink_report: SinkReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn tables(&self) -> Vec<TableSummary> {
        self.run_log
            .tables
            .iter()
            .map(|(name, log)| TableSummary {
                table: name.clone(),
                rows_written: log.rows_written,
                chunks: log.chunks,
                duplicates_dropped: log.duplicates_dropped,
                orphaned_rows: log.orphaned_rows,
                errors: log.error_count(),
            })
            .collect()
    }

    pub fn total_rows_written(&self) -> usize {
        self.run_log.total_rows_written()
    }

    pub fn error_count(&self) -> usize {
        self.run_log.tables.values().map(|t| t.error_count()).sum()
    }
}

/// Per-table state threaded through the chunks of one table.
struct TableProgress<'a> {
    chunk: usize,
    dedup: &'a mut Deduplicator,
    mode: &'a mut WriteMode,
    /// Next synthesized primary key.
    next_key: &'a mut i64,
}

/// Identifier mask plus the write mode of its state table.
struct MaskState {
    masker: IdentifierMasker,
    mode: WriteMode,
    /// Identifiers masked by this run; a repeat in a later chunk is a
    /// duplicate row, not a remap.
    assigned: HashSet<String>,
}

pub struct Orchestrator<'a, S: Sink> {
    config: RunConfig,
    schema: &'a SchemaVersion,
    rules: RuleDocument,
    sources: SourceCollection,
    sink: S,
}

impl<'a, S: Sink> Orchestrator<'a, S> {
    pub fn new(
        config: RunConfig,
        schema: &'a SchemaVersion,
        rules: RuleDocument,
        sources: SourceCollection,
        sink: S,
    ) -> Self {
        Self {
            config,
            schema,
            rules,
            sources,
            sink,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs every table to completion.
    pub fn run(&mut self) -> Result<RunSummary> {
        let run_span = info_span!(
            "mapping_run",
            dataset = %self.rules.metadata.dataset,
            cdm_version = %self.config.cdm_version,
            sink = %self.sink.name()
        );
        let _run_guard = run_span.enter();
        let start = Instant::now();

        let mut log = RunLog::new(
            self.rules.metadata.dataset.clone(),
            self.config.cdm_version.clone(),
        );
        let outcome = self.execute(&mut log);
        if let Err(err) = &outcome {
            error!(error = %err, "run aborted");
            log.aborted = Some(err.to_string());
        }

        let report = self.sink.finalize();
        if let Ok(report) = &report {
            for warning in &report.warnings {
                warn!(warning = %warning, "sink reported a partial failure");
            }
            log.warnings.extend(report.warnings.iter().cloned());
        }
        log.finish();
        let persisted = self.sink.persist_run_log(&log);

        outcome?;
        let sink_report = report?;
        let location = persisted?;
        info!(
            rows = log.total_rows_written(),
            tables = log.tables.len(),
            run_log = %location,
            duration_ms = start.elapsed().as_millis(),
            "run complete"
        );
        Ok(RunSummary {
            run_log: log,
            sink_report,
            elapsed: start.elapsed(),
        })
    }

    fn execute(&mut self, log: &mut RunLog) -> Result<()> {
        self.sources.check_inputs(self.rules.source_tables())?;
        let mut plans = plan_tables(self.schema, &self.rules, &self.config.identity_table)?;
        let mut mask = self.load_state(log)?;
        for plan in &mut plans {
            self.process_table(plan, &mut mask, log)?;
        }
        Ok(())
    }

    fn load_state(&mut self, log: &mut RunLog) -> Result<MaskState> {
        if !self.config.resume {
            return Ok(MaskState {
                masker: IdentifierMasker::new(self.config.start_index),
                mode: WriteMode::Create,
                assigned: HashSet::new(),
            });
        }
        if let Some(counts) = self.sink.load_existing_row_counts()? {
            log.seed_existing(&counts);
        }
        let existing = self.sink.load_existing_identifier_map()?.unwrap_or_default();
        let mode = if existing.is_empty() {
            WriteMode::Create
        } else {
            WriteMode::Append
        };
        info!(identifiers = existing.len(), "resuming from persisted state");
        Ok(MaskState {
            masker: IdentifierMasker::from_existing(existing, self.config.start_index),
            mode,
            assigned: HashSet::new(),
        })
    }

    fn process_table(
        &mut self,
        plan: &mut TablePlan,
        mask: &mut MaskState,
        log: &mut RunLog,
    ) -> Result<()> {
        let table_span = info_span!("table", table = %plan.table);
        let _table_guard = table_span.enter();
        let start = Instant::now();

        let sources = self
            .sources
            .check_inputs(plan.source_tables().iter().map(String::as_str))?;
        self.sources.reset(&sources)?;
        let fetch = self.config.fetch_size();
        let mut state = self.sources.initialize(&sources, fetch)?;

        let existing = log.table(&plan.table).map_or(0, |t| t.existing_rows);
        let mut mode = if self.config.resume && existing > 0 {
            WriteMode::Append
        } else {
            WriteMode::Create
        };
        let mut dedup = Deduplicator::new();
        let mut next_key = log.next_index(&plan.table, self.config.start_index);
        let mut chunk = 0;
        while state == Advance::Advanced {
            chunk += 1;
            let mut progress = TableProgress {
                chunk,
                dedup: &mut dedup,
                mode: &mut mode,
                next_key: &mut next_key,
            };
            self.process_chunk(plan, &mut progress, mask, log)?;
            state = self.sources.advance(&sources, fetch)?;
        }
        log.table_mut(&plan.table).chunks = chunk;
        info!(
            table = %plan.table,
            chunks = chunk,
            rows = log.table(&plan.table).map_or(0, |t| t.rows_written),
            duration_ms = start.elapsed().as_millis(),
            "table complete"
        );
        Ok(())
    }

    fn process_chunk(
        &mut self,
        plan: &mut TablePlan,
        progress: &mut TableProgress<'_>,
        mask: &mut MaskState,
        log: &mut RunLog,
    ) -> Result<()> {
        let table = plan.table.clone();
        let chunk = progress.chunk;
        let options = BuildOptions::from_config(&self.config);

        let mut batches = Vec::new();
        let mut keys = SynthesizedKeys::default();
        for instance in &mut plan.instances {
            instance.invalidate();
            let built = Instant::now();
            let result = instance
                .build(&self.sources, *progress.next_key, &options)
                .cloned();
            let rule_set_log = log
                .table_mut(&table)
                .rule_sets
                .entry(instance.name().to_string())
                .or_default();
            match result {
                Ok(batch) => {
                    let metadata = instance.metadata();
                    for (field, count) in &metadata.required {
                        let entry = rule_set_log.required.entry(field.clone()).or_default();
                        entry.before += count.before;
                        entry.after += count.after;
                    }
                    rule_set_log.formatting_dropped += metadata.formatting_dropped;
                    debug!(
                        table = %table,
                        rule_set = %instance.name(),
                        chunk,
                        rows = batch.height(),
                        duration_ms = built.elapsed().as_millis(),
                        "instance built"
                    );
                    if !batch.is_empty() {
                        keys.push(metadata.synthesized_key, batch.height());
                        batches.push(batch);
                    }
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    let provenance: Vec<String> = instance
                        .metadata()
                        .provenance
                        .iter()
                        .map(|(field, p)| format!("{field}<-{}.{}", p.source.table, p.source.field))
                        .collect();
                    warn!(
                        table = %table,
                        rule_set = %instance.name(),
                        chunk,
                        error = %err,
                        provenance = %provenance.join(", "),
                        "skipping instance for this chunk"
                    );
                    rule_set_log.errors.push(format!("chunk {chunk}: {err}"));
                }
            }
        }
        if batches.is_empty() {
            return Ok(());
        }

        let mut batch = RowBatch::concat(batches)?;
        let definition = self.schema.table(&table)?;
        let primary_key = definition.primary_key().map(|f| f.name.clone());
        let primary_key = primary_key.as_deref();

        if plan.is_identity {
            // A synthesized identity key is also the identifier that gets masked.
            let key_is_identifier =
                primary_key.is_some_and(|k| k.eq_ignore_ascii_case(&self.config.identifier_field));
            if key_is_identifier {
                keys.assign(&mut batch, primary_key, progress.next_key)?;
            }
            let (masked, entries, kept) = self.mask_identity(&table, batch, mask, log)?;
            batch = masked;
            keys.retain(&kept);
            if !key_is_identifier {
                keys.assign(&mut batch, primary_key, progress.next_key)?;
            }
            // Mask entries go first: a failed table write then leaves identifiers
            // that a rerun reports as already masked.
            if !entries.is_empty() {
                let state = mask_entries_batch(&entries)?;
                self.sink.write(MASK_TABLE, &state, mask.mode)?;
                mask.mode = WriteMode::Append;
                log.new_identifiers += entries.len();
            }
            return self.write(&table, &batch, progress.mode, chunk, log);
        }

        let masked = mask_dependent(&mask.masker, &batch, &self.config.identifier_field)?;
        if masked.orphaned > 0 {
            warn!(
                table = %table,
                chunk,
                orphaned = masked.orphaned,
                "dropped rows whose identifier is not in the identity table"
            );
            log.table_mut(&table).orphaned_rows += masked.orphaned;
        }
        batch = masked.batch;
        keys.retain(&masked.kept);

        let exclude: Vec<&str> = primary_key.into_iter().collect();
        let outcome = progress.dedup.apply(&batch, &exclude)?;
        if !outcome.dropped.is_empty() {
            let sample: Vec<String> = outcome
                .dropped
                .iter()
                .take(DUPLICATE_SAMPLE)
                .map(|idx| self.describe_row(&batch, *idx))
                .collect();
            info!(
                table = %table,
                chunk,
                duplicates = outcome.dropped.len(),
                sample = %sample.join(" | "),
                "dropped duplicate rows"
            );
            log.table_mut(&table).duplicates_dropped += outcome.dropped.len();
        }
        batch = outcome.batch;
        keys.drop_rows(&outcome.dropped);
        keys.assign(&mut batch, primary_key, progress.next_key)?;
        self.write(&table, &batch, progress.mode, chunk, log)
    }

    /// Drops identifiers already seen in this run and assigns new masked
    /// values. Identifiers masked by an earlier run are a `DuplicateIdentity`.
    /// Returns the masked batch, the new mask entries and the kept rows.
    fn mask_identity(
        &self,
        table: &str,
        batch: RowBatch,
        mask: &mut MaskState,
        log: &mut RunLog,
    ) -> Result<(RowBatch, Vec<(String, i64)>, Vec<bool>)> {
        let field = &self.config.identifier_field;
        let column = batch.column_ci(field).ok_or_else(|| {
            CdmError::BadInputs(format!("identity table {table} has no '{field}' column"))
        })?;
        let missing = column.null_count();
        let keep: Vec<bool> = column
            .values
            .iter()
            .map(|v| !v.is_null() && mask.assigned.insert(v.canonical()))
            .collect();
        let repeated = keep.iter().filter(|k| !**k).count() - missing;
        if missing > 0 {
            warn!(table, missing, "dropped identity rows without an identifier");
            log.table_mut(table).missing_identifiers += missing;
        }
        if repeated > 0 {
            warn!(table, repeated, "dropped repeated identifiers in identity batch");
            log.table_mut(table).duplicates_dropped += repeated;
        }
        let masker = &mut mask.masker;
        let mut kept = batch.filter(&keep)?;
        let name = column.name.clone();
        let masked = kept
            .column(&name)
            .map(|c| {
                c.values
                    .iter()
                    .map(|v| masker.extend(&v.canonical()).map(Value::Int))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        kept.replace_column(Column::new(name, masked))?;
        Ok((kept, masker.take_new(), keep))
    }

    fn write(
        &mut self,
        table: &str,
        batch: &RowBatch,
        mode: &mut WriteMode,
        chunk: usize,
        log: &mut RunLog,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let location = self.sink.write(table, batch, *mode).map_err(RunError::from)?;
        debug!(
            table,
            chunk,
            mode = %mode,
            rows = batch.height(),
            location = %location,
            duration_ms = start.elapsed().as_millis(),
            "wrote chunk"
        );
        log.record_written(table, batch.height(), location.uri);
        *mode = WriteMode::Append;
        Ok(())
    }

    fn describe_row(&self, batch: &RowBatch, idx: usize) -> String {
        if !self.config.log_data {
            return format!("row {idx} <redacted>");
        }
        batch
            .row(idx)
            .iter()
            .map(|v| v.canonical())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Which stacked rows carry a synthesized primary key.
#[derive(Debug, Default)]
struct SynthesizedKeys {
    rows: Vec<bool>,
}

impl SynthesizedKeys {
    fn push(&mut self, synthesized: bool, rows: usize) {
        self.rows.extend(std::iter::repeat_n(synthesized, rows));
    }

    fn retain(&mut self, keep: &[bool]) {
        self.rows = self
            .rows
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(s, _)| *s)
            .collect();
    }

    fn drop_rows(&mut self, dropped: &[usize]) {
        let dropped: HashSet<usize> = dropped.iter().copied().collect();
        self.rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(idx, _)| !dropped.contains(idx))
            .map(|(_, s)| *s)
            .collect();
    }

    /// Numbers the synthesized rows of `key` densely from `next`, raising
    /// `next` above every mapped key in the batch first.
    fn assign(
        &self,
        batch: &mut RowBatch,
        key: Option<&str>,
        next: &mut i64,
    ) -> std::result::Result<(), CdmError> {
        let Some(key) = key else {
            return Ok(());
        };
        let Some(column) = batch.column(key) else {
            return Ok(());
        };
        let highest_mapped = column
            .values
            .iter()
            .zip(&self.rows)
            .filter(|(_, synthesized)| !**synthesized)
            .filter_map(|(v, _)| v.as_i64())
            .max();
        if let Some(highest) = highest_mapped {
            *next = (*next).max(highest.saturating_add(1));
        }
        if !self.rows.iter().any(|s| *s) {
            return Ok(());
        }
        let values = column
            .values
            .iter()
            .zip(&self.rows)
            .map(|(value, synthesized)| {
                if *synthesized {
                    let key = *next;
                    *next += 1;
                    Value::Int(key)
                } else {
                    value.clone()
                }
            })
            .collect();
        let name = column.name.clone();
        batch.replace_column(Column::new(name, values))
    }
}
