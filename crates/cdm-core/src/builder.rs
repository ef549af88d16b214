use cdm_model::{CdmError, RuleDocument, RuleSet, TableDefinition};
use cdm_standards::SchemaVersion;

use crate::instance::TargetTableInstance;
use crate::strategy::TableStrategy;

/// Binds rule sets to one table definition and its strategy.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    definition: TableDefinition,
    strategy: TableStrategy,
}

impl TableBuilder {
    pub fn new(definition: &TableDefinition) -> Self {
        Self {
            strategy: TableStrategy::for_table(&definition.name),
            definition: definition.clone(),
        }
    }

    pub fn with_strategy(mut self, strategy: TableStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn bind(&self, rule_set: impl Into<String>, rules: RuleSet) -> TargetTableInstance {
        TargetTableInstance::new(rule_set, self.definition.clone(), rules, self.strategy)
    }
}

/// Every instance declared for one target table.
pub struct TablePlan {
    pub table: String,
    pub is_identity: bool,
    pub instances: Vec<TargetTableInstance>,
}

impl TablePlan {
    /// Distinct source tables referenced by the plan's rules.
    pub fn source_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .iter()
            .flat_map(|i| i.source_tables())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Builds one plan per table in `document`, identity table first and the
/// rest in name order. Tables missing from `schema` are `UnknownTable`.
pub fn plan_tables(
    schema: &SchemaVersion,
    document: &RuleDocument,
    identity_table: &str,
) -> Result<Vec<TablePlan>, CdmError> {
    let mut plans = Vec::new();
    for (table, rule_sets) in &document.cdm {
        let definition = schema.table(table)?;
        let builder = TableBuilder::new(definition);
        let instances = rule_sets
            .iter()
            .map(|(name, rules)| builder.bind(name.clone(), rules.clone()))
            .collect();
        plans.push(TablePlan {
            table: definition.name.clone(),
            is_identity: definition.is_identity || definition.name.eq_ignore_ascii_case(identity_table),
            instances,
        });
    }
    plans.sort_by(|a, b| b.is_identity.cmp(&a.is_identity).then_with(|| a.table.cmp(&b.table)));
    Ok(plans)
}
