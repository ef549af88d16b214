use std::collections::BTreeMap;
use std::path::Path;

use csv::ReaderBuilder;

use cdm_model::{FieldDefinition, LogicalType, TableDefinition};

use crate::error::StandardsError;

pub const TABLES_FILE: &str = "Tables.csv";
pub const FIELDS_FILE: &str = "Fields.csv";

pub(crate) fn read_csv_rows(path: &Path) -> Result<Vec<BTreeMap<String, String>>, StandardsError> {
    let csv_error = |err: csv::Error| StandardsError::Csv {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| {
            let missing = matches!(
                err.kind(),
                csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound
            );
            if missing {
                StandardsError::MissingFile {
                    path: path.to_path_buf(),
                }
            } else {
                csv_error(err)
            }
        })?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let mut row = BTreeMap::new();
        for (idx, value) in record.iter().enumerate() {
            let key = headers
                .get(idx)
                .unwrap_or("")
                .trim_matches('\u{feff}')
                .to_string();
            row.insert(key, value.trim().to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

fn flag(row: &BTreeMap<String, String>, key: &str) -> bool {
    row.get(key)
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "y" | "true" | "1"))
}

/// Loads the table definitions of one schema version directory.
pub fn load_table_definitions(dir: &Path) -> Result<Vec<TableDefinition>, StandardsError> {
    let tables_path = dir.join(TABLES_FILE);
    let fields_path = dir.join(FIELDS_FILE);
    let tables = read_csv_rows(&tables_path)?;
    let fields = read_csv_rows(&fields_path)?;

    let mut grouped: BTreeMap<String, Vec<FieldDefinition>> = BTreeMap::new();
    for row in &fields {
        let table = row.get("Table Name").cloned().unwrap_or_default();
        let name = row.get("Field Name").cloned().unwrap_or_default();
        if table.is_empty() || name.is_empty() {
            continue;
        }
        let raw_type = row.get("Type").map(String::as_str).unwrap_or_default();
        let logical_type: LogicalType =
            raw_type
                .parse()
                .map_err(|source| StandardsError::Definition {
                    path: fields_path.clone(),
                    source,
                })?;
        let mut field = FieldDefinition::new(name, logical_type);
        field.required = flag(row, "Required");
        if flag(row, "Primary Key") {
            field = field.primary_key();
        }
        grouped.entry(table.to_ascii_lowercase()).or_default().push(field);
    }

    let mut definitions = Vec::new();
    for row in &tables {
        let name = row.get("Table Name").cloned().unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let fields = grouped.remove(&name.to_ascii_lowercase()).unwrap_or_default();
        if fields.is_empty() {
            return Err(StandardsError::Csv {
                path: fields_path.clone(),
                message: format!("table '{name}' has no fields"),
            });
        }
        let mut definition = TableDefinition::new(name, fields);
        definition.is_identity = flag(row, "Identity");
        definition.description = row.get("Description").filter(|v| !v.is_empty()).cloned();
        definitions.push(definition);
    }
    if let Some(orphan) = grouped.keys().next() {
        return Err(StandardsError::Csv {
            path: fields_path,
            message: format!("fields listed for undeclared table '{orphan}'"),
        });
    }
    Ok(definitions)
}
