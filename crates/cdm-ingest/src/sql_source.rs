//! SQLite query source paged with `LIMIT`/`OFFSET`.

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use cdm_model::{Column, RowBatch, Value};

use crate::error::{IngestError, Result};
use crate::source::ChunkedSource;

pub fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<blob {} bytes>", bytes.len())),
    }
}

/// Pages through the result set of a read-only query.
///
/// The query is wrapped as a sub-select, so it must not carry its own
/// `LIMIT`. Add an `ORDER BY` when stable paging matters.
pub struct SqlQuerySource {
    name: String,
    db_path: PathBuf,
    query: String,
    connection: Option<Connection>,
    offset: usize,
}

impl SqlQuerySource {
    pub fn new(name: impl Into<String>, db_path: impl AsRef<Path>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_path: db_path.as_ref().to_path_buf(),
            query: query.into(),
            connection: None,
            offset: 0,
        }
    }

    /// Reads a whole table.
    pub fn table(db_path: impl AsRef<Path>, table: &str) -> Self {
        let query = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
        Self::new(table, db_path, query)
    }

    fn sql_error(&self, source: rusqlite::Error) -> IngestError {
        IngestError::Sql {
            source_name: self.name.clone(),
            source,
        }
    }

    fn connection(&mut self) -> Result<&Connection> {
        if self.connection.is_none() {
            let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|err| self.sql_error(err))?;
            self.connection = Some(conn);
        }
        self.connection
            .as_ref()
            .ok_or_else(|| IngestError::UnknownSource {
                name: self.name.clone(),
            })
    }

    fn page(&mut self, limit: i64, offset: i64) -> Result<RowBatch> {
        let sql = format!("SELECT * FROM ({}) LIMIT ?1 OFFSET ?2", self.query);
        let source_name = self.name.clone();
        let sql_error = |source| IngestError::Sql {
            source_name: source_name.clone(),
            source,
        };
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql).map_err(sql_error)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = stmt.query(params![limit, offset]).map_err(sql_error)?;
        while let Some(row) = rows.next().map_err(sql_error)? {
            for (idx, column) in values.iter_mut().enumerate() {
                let value = row.get_ref(idx).map_err(sql_error)?;
                column.push(value_from_sql(value));
            }
        }
        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column::new(name, values))
            .collect();
        Ok(RowBatch::new(columns)?)
    }
}

impl ChunkedSource for SqlQuerySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_next(&mut self, size_hint: usize) -> Result<RowBatch> {
        // SQLite treats a negative limit as unbounded.
        let limit = i64::try_from(size_hint).unwrap_or(-1);
        let offset = i64::try_from(self.offset).unwrap_or(i64::MAX);
        let batch = self.page(limit, offset)?;
        self.offset += batch.height();
        debug!(
            source = %self.name,
            rows = batch.height(),
            offset = self.offset,
            "fetched sql chunk"
        );
        Ok(batch)
    }

    fn reset(&mut self) -> Result<()> {
        self.offset = 0;
        Ok(())
    }

    fn columns(&mut self) -> Result<Vec<String>> {
        let batch = self.page(0, 0)?;
        Ok(batch
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}
