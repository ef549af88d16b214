//! Resolves one mapping rule against the source tables of the current chunk.

use cdm_model::{
    CdmError, Column, FIELD_NAME_LIMIT, FieldProvenance, MappingRule, TABLE_NAME_LIMIT, TableSet,
    TermMapping, Value, resolve_name,
};
use cdm_transform::apply_operations;
use tracing::debug;

/// A destination column produced from a rule, with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub column: Column,
    pub provenance: FieldProvenance,
}

/// Copies the source column named by `rule`, applies its operations and term
/// mapping, and renames the result to `destination`.
pub fn resolve_rule<T: TableSet + ?Sized>(
    destination: &str,
    rule: &MappingRule,
    tables: &T,
) -> Result<ResolvedField, CdmError> {
    let (table_name, table_match) =
        resolve_name(&rule.source_table, tables.table_names(), TABLE_NAME_LIMIT).ok_or_else(
            || CdmError::SourceTableNotFound {
                table: rule.source_table.clone(),
            },
        )?;
    let table = tables
        .table(table_name)
        .ok_or_else(|| CdmError::SourceTableNotFound {
            table: rule.source_table.clone(),
        })?;
    let (field_name, field_match) =
        resolve_name(&rule.source_field, table.column_names(), FIELD_NAME_LIMIT).ok_or_else(
            || CdmError::SourceFieldNotFound {
                table: table_name.to_string(),
                field: rule.source_field.clone(),
            },
        )?;
    let source = table
        .column(field_name)
        .ok_or_else(|| CdmError::SourceFieldNotFound {
            table: table_name.to_string(),
            field: rule.source_field.clone(),
        })?;

    let mut provenance = FieldProvenance::new(table_name, field_name, table_match, field_match);
    if provenance.fuzzy_match {
        debug!(
            destination,
            requested_table = %rule.source_table,
            requested_field = %rule.source_field,
            table = table_name,
            field = field_name,
            "resolved source by fallback match"
        );
    }

    let mut column = apply_operations(source, &rule.operations)?;
    provenance.operations = rule.operations.clone();
    if let Some(mapping) = &rule.term_mapping {
        column = apply_term_mapping(&column, mapping);
        provenance.term_mapped = true;
    }

    Ok(ResolvedField {
        column: column.renamed(destination),
        provenance,
    })
}

/// Maps values through `mapping`; unmapped values become null.
pub fn apply_term_mapping(column: &Column, mapping: &TermMapping) -> Column {
    let values = match mapping {
        TermMapping::Constant(value) => vec![value.clone(); column.len()],
        TermMapping::Map(lookup) => column
            .values
            .iter()
            .map(|v| {
                if v.is_null() {
                    return Value::Null;
                }
                lookup.get(&v.canonical()).cloned().unwrap_or_default()
            })
            .collect(),
    };
    Column::new(column.name.clone(), values)
}
