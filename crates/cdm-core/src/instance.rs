//! One rule set bound to one target table definition.
//!
//! A [`TargetTableInstance`] turns the current chunk of its source tables
//! into a batch shaped like its [`TableDefinition`]. Building runs through
//! fixed stages and caches the result until [`TargetTableInstance::invalidate`]
//! is called. A failing stage leaves the instance unbuilt with no cache.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use cdm_map::resolve_rule;
use cdm_model::{
    CdmError, Column, FieldDefinition, FormatPolicy, ProvenanceMap, RequiredCount, RowBatch,
    RuleSet, RunConfig, TableDefinition, TableSet, Value,
};
use cdm_transform::{check_column, format_checked};

use crate::strategy::TableStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Unbuilt,
    RulesApplied,
    Validated,
    Finalized,
    Formatted,
}

/// Run options an instance needs while building.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions<'a> {
    pub format_policy: FormatPolicy,
    pub check_sample_size: usize,
    pub check_tolerance: f64,
    /// Foreign key to the identity table; never formatted.
    pub identifier_field: &'a str,
    pub log_data: bool,
}

impl<'a> BuildOptions<'a> {
    pub fn from_config(config: &'a RunConfig) -> Self {
        Self {
            format_policy: config.format_policy,
            check_sample_size: config.check_sample_size,
            check_tolerance: config.check_tolerance,
            identifier_field: &config.identifier_field,
            log_data: config.log_data,
        }
    }
}

/// What the last build observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMetadata {
    pub provenance: ProvenanceMap,
    pub required: BTreeMap<String, RequiredCount>,
    /// Rows dropped because a required value could not be coerced.
    pub formatting_dropped: usize,
    pub synthesized_key: bool,
    pub auto_filled: Vec<String>,
}

pub struct TargetTableInstance {
    name: String,
    definition: TableDefinition,
    rules: RuleSet,
    strategy: TableStrategy,
    stage: BuildStage,
    cache: Option<RowBatch>,
    metadata: InstanceMetadata,
}

impl TargetTableInstance {
    pub fn new(
        name: impl Into<String>,
        definition: TableDefinition,
        rules: RuleSet,
        strategy: TableStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            definition,
            rules,
            strategy,
            stage: BuildStage::Unbuilt,
            cache: None,
            metadata: InstanceMetadata::default(),
        }
    }

    /// Rule set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn strategy(&self) -> &TableStrategy {
        &self.strategy
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    pub fn is_built(&self) -> bool {
        self.stage == BuildStage::Formatted && self.cache.is_some()
    }

    /// Source tables referenced by this instance's rules.
    pub fn source_tables(&self) -> BTreeSet<&str> {
        self.rules.values().map(|r| r.source_table.as_str()).collect()
    }

    /// Drops the cached batch so the next build reads the current chunk.
    pub fn invalidate(&mut self) {
        self.cache = None;
        self.stage = BuildStage::Unbuilt;
    }

    /// Builds the batch for the current chunk, or returns the cached one.
    pub fn build<T: TableSet + ?Sized>(
        &mut self,
        tables: &T,
        start_index: i64,
        options: &BuildOptions<'_>,
    ) -> Result<&RowBatch, CdmError> {
        if !self.is_built() {
            self.metadata = InstanceMetadata::default();
            match self.run_stages(tables, start_index, options) {
                Ok(batch) => self.cache = Some(batch),
                Err(err) => {
                    self.invalidate();
                    return Err(err);
                }
            }
        }
        self.cache.as_ref().ok_or_else(|| {
            CdmError::BadInputs(format!("{}/{} has no built batch", self.table_name(), self.name))
        })
    }

    fn run_stages<T: TableSet + ?Sized>(
        &mut self,
        tables: &T,
        start_index: i64,
        options: &BuildOptions<'_>,
    ) -> Result<RowBatch, CdmError> {
        let resolved = self.apply_rules(tables)?;
        self.stage = BuildStage::RulesApplied;

        let height = self.validate_lengths(&resolved)?;
        self.stage = BuildStage::Validated;

        let mut batch = self.order_columns(resolved, height)?;
        self.finalize(&mut batch, start_index)?;
        self.stage = BuildStage::Finalized;

        let batch = self.format(batch, options)?;
        self.stage = BuildStage::Formatted;
        debug!(
            table = %self.definition.name,
            rule_set = %self.name,
            rows = batch.height(),
            "built target instance"
        );
        Ok(batch)
    }

    fn apply_rules<T: TableSet + ?Sized>(
        &mut self,
        tables: &T,
    ) -> Result<BTreeMap<String, Column>, CdmError> {
        let mut resolved = BTreeMap::new();
        for (destination, rule) in &self.rules {
            let field = self.definition.field(destination).ok_or_else(|| {
                CdmError::InvalidRules(format!(
                    "'{}' is not a field of {}",
                    destination, self.definition.name
                ))
            })?;
            let out = resolve_rule(&field.name, rule, tables)?;
            self.metadata
                .provenance
                .insert(field.name.clone(), out.provenance);
            resolved.insert(field.name.clone(), out.column);
        }
        Ok(resolved)
    }

    fn validate_lengths(&self, resolved: &BTreeMap<String, Column>) -> Result<usize, CdmError> {
        let mut columns = resolved.values();
        let Some(first) = columns.next() else {
            return Ok(0);
        };
        let height = first.len();
        for column in columns {
            if column.len() != height {
                return Err(CdmError::RowCountMismatch {
                    context: format!(
                        "{}/{} field '{}' (first field '{}')",
                        self.definition.name, self.name, column.name, first.name
                    ),
                    expected: height,
                    found: column.len(),
                });
            }
        }
        Ok(height)
    }

    fn order_columns(
        &self,
        mut resolved: BTreeMap<String, Column>,
        height: usize,
    ) -> Result<RowBatch, CdmError> {
        let columns = self
            .definition
            .fields
            .iter()
            .map(|field| {
                resolved
                    .remove(&field.name)
                    .unwrap_or_else(|| Column::nulls(field.name.clone(), height))
            })
            .collect();
        RowBatch::new(columns)
    }

    fn finalize(&mut self, batch: &mut RowBatch, start_index: i64) -> Result<(), CdmError> {
        let table = self.definition.name.clone();
        self.metadata.auto_filled = self.strategy.apply_auto_fill(&table, batch)?;

        if self.strategy.synthesizes_key(&self.definition) && !batch.is_empty() {
            if let Some(pk) = self.definition.primary_key() {
                let all_null = batch.column(&pk.name).is_none_or(Column::is_all_null);
                if all_null {
                    let keys = (0..batch.height())
                        .map(|offset| Value::Int(start_index + offset as i64))
                        .collect();
                    batch.replace_column(Column::new(pk.name.clone(), keys))?;
                    self.metadata.synthesized_key = true;
                }
            }
        }

        for field in self.definition.required_fields() {
            let Some(column) = batch.column(&field.name) else {
                continue;
            };
            let before = batch.height();
            let keep: Vec<bool> = column.values.iter().map(|v| !v.is_null()).collect();
            let after = keep.iter().filter(|k| **k).count();
            self.metadata
                .required
                .insert(field.name.clone(), RequiredCount { before, after });
            if after == before {
                continue;
            }
            if after == 0 {
                return Err(self.formatting_error(
                    field,
                    format!("required field is null in all {before} rows"),
                ));
            }
            debug!(
                table = %table,
                rule_set = %self.name,
                field = %field.name,
                dropped = before - after,
                "dropped rows with null required field"
            );
            *batch = batch.filter(&keep)?;
        }
        Ok(())
    }

    fn is_key_field(&self, field: &FieldDefinition, options: &BuildOptions<'_>) -> bool {
        field.is_primary_key || field.name.eq_ignore_ascii_case(options.identifier_field)
    }

    fn format(&mut self, batch: RowBatch, options: &BuildOptions<'_>) -> Result<RowBatch, CdmError> {
        match options.format_policy {
            FormatPolicy::Off => Ok(batch),
            FormatPolicy::Check => {
                for field in &self.definition.fields {
                    if self.is_key_field(field, options) {
                        continue;
                    }
                    let Some(column) = batch.column(&field.name) else {
                        continue;
                    };
                    if let Err(err) = check_column(
                        &self.definition.name,
                        field,
                        column,
                        options.check_sample_size,
                        options.check_tolerance,
                    ) {
                        warn!(
                            table = %self.definition.name,
                            rule_set = %self.name,
                            field = %field.name,
                            source = %self.describe_source(&field.name),
                            "sampled values do not conform"
                        );
                        return Err(err);
                    }
                }
                Ok(batch)
            }
            FormatPolicy::On => self.coerce(batch, options),
        }
    }

    fn coerce(&mut self, mut batch: RowBatch, options: &BuildOptions<'_>) -> Result<RowBatch, CdmError> {
        let mut keep = vec![true; batch.height()];
        let mut first_failing: Option<String> = None;
        let fields: Vec<FieldDefinition> = self.definition.fields.clone();
        for field in &fields {
            if self.is_key_field(field, options) {
                continue;
            }
            let Some(column) = batch.column(&field.name) else {
                continue;
            };
            let (formatted, failures) = format_checked(field.logical_type, column);
            if field.required && !failures.is_empty() {
                let sample: Vec<String> = failures
                    .iter()
                    .take(3)
                    .map(|idx| column.values[*idx].canonical())
                    .collect();
                warn!(
                    table = %self.definition.name,
                    rule_set = %self.name,
                    field = %field.name,
                    source = %self.describe_source(&field.name),
                    failed = failures.len(),
                    sample = %if options.log_data { sample.join(", ") } else { "<redacted>".to_string() },
                    "required values could not be formatted"
                );
                for idx in &failures {
                    keep[*idx] = false;
                }
                first_failing.get_or_insert_with(|| field.name.clone());
            }
            batch.replace_column(formatted)?;
        }

        let before = batch.height();
        let after = keep.iter().filter(|k| **k).count();
        if after == before {
            return Ok(batch);
        }
        if after == 0 {
            let field = first_failing.unwrap_or_default();
            return Err(CdmError::FormattingError {
                message: format!(
                    "every row failed type coercion (rule set {}, source {})",
                    self.name,
                    self.describe_source(&field)
                ),
                table: self.definition.name.clone(),
                field,
            });
        }
        self.metadata.formatting_dropped += before - after;
        batch.filter(&keep)
    }

    fn describe_source(&self, field: &str) -> String {
        self.metadata
            .provenance
            .get(field)
            .map_or_else(|| "<no rule>".to_string(), |p| {
                format!("{}.{}", p.source.table, p.source.field)
            })
    }

    fn formatting_error(&self, field: &FieldDefinition, message: String) -> CdmError {
        CdmError::FormattingError {
            table: self.definition.name.clone(),
            field: field.name.clone(),
            message: format!(
                "{message} (rule set {}, source {})",
                self.name,
                self.describe_source(&field.name)
            ),
        }
    }
}
