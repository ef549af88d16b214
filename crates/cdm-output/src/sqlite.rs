//! Relational sink backed by a SQLite database.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use cdm_core::{
    Location, MASK_TABLE, SOURCE_SUBJECT, Sink, SinkError, SinkReport, TARGET_SUBJECT, WriteMode,
};
use cdm_ingest::value_from_sql;
use cdm_model::{Column, LogicalType, RowBatch, RunLog, TableDefinition, Value};

/// Table holding one JSON run log per run.
pub const RUN_LOG_TABLE: &str = "_cdm_run_log";

const SINK: &str = "sqlite";

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        other => SqlValue::Text(other.canonical()),
    }
}

fn column_type(logical_type: LogicalType) -> &'static str {
    match logical_type {
        LogicalType::Integer => "INTEGER",
        LogicalType::Float => "REAL",
        LogicalType::Text { .. } | LogicalType::Timestamp | LogicalType::Date => "TEXT",
    }
}

/// Replaces or appends whole tables, one transaction per write.
///
/// Table definitions are optional. With one, columns get a declared type
/// and appends are checked for primary key continuity.
pub struct SqliteSink {
    conn: Connection,
    definitions: BTreeMap<String, TableDefinition>,
    written: BTreeMap<String, usize>,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let conn = Connection::open(path).map_err(|err| SinkError::backend(SINK, "", err))?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(|err| SinkError::backend(SINK, "", err))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            definitions: BTreeMap::new(),
            written: BTreeMap::new(),
        }
    }

    pub fn with_definitions<'a>(
        mut self,
        definitions: impl IntoIterator<Item = &'a TableDefinition>,
    ) -> Self {
        for definition in definitions {
            self.definitions
                .insert(definition.name.clone(), definition.clone());
        }
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn table_exists(&self, table: &str) -> rusqlite::Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
    }

    fn user_tables(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Reads a whole table back, `None` when it does not exist.
    pub fn read_table(&self, table: &str) -> Result<Option<RowBatch>, SinkError> {
        let backend = |err: rusqlite::Error| SinkError::backend(SINK, table, err);
        if !self.table_exists(table).map_err(backend)? {
            return Ok(None);
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote(table)))
            .map_err(backend)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = stmt.query([]).map_err(backend)?;
        while let Some(row) = rows.next().map_err(backend)? {
            for (idx, column) in values.iter_mut().enumerate() {
                column.push(value_from_sql(row.get_ref(idx).map_err(backend)?));
            }
        }
        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column::new(name, values))
            .collect();
        Ok(Some(RowBatch::new(columns)?))
    }

    /// Mapped tables in the database, without the mask and run-log tables.
    pub fn table_names(&self) -> Result<Vec<String>, SinkError> {
        let names = self
            .user_tables()
            .map_err(|err| SinkError::backend(SINK, "", err))?;
        Ok(names
            .into_iter()
            .filter(|name| name != MASK_TABLE && name != RUN_LOG_TABLE)
            .collect())
    }

    fn create_sql(&self, table: &str, batch: &RowBatch) -> String {
        let definition = self.definitions.get(table);
        let columns: Vec<String> = batch
            .column_names()
            .into_iter()
            .map(|name| {
                let field = definition.and_then(|d| d.field(name));
                match field {
                    Some(f) => format!("{} {}", quote(name), column_type(f.logical_type)),
                    None => quote(name),
                }
            })
            .collect();
        format!("CREATE TABLE IF NOT EXISTS {} ({})", quote(table), columns.join(", "))
    }

    /// Fails when the first new primary key does not follow the stored maximum.
    fn check_continuity(&self, table: &str, batch: &RowBatch) -> Result<(), SinkError> {
        let Some(pk) = self.definitions.get(table).and_then(|d| d.primary_key()) else {
            return Ok(());
        };
        let Some(first_new) = batch
            .column(&pk.name)
            .and_then(|c| c.values.first())
            .and_then(Value::as_i64)
        else {
            return Ok(());
        };
        let stored_max: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT MAX({}) FROM {}", quote(&pk.name), quote(table)),
                [],
                |row| row.get(0),
            )
            .map_err(|err| SinkError::backend(SINK, table, err))?;
        match stored_max {
            Some(stored_max) if first_new <= stored_max => Err(SinkError::KeyContinuity {
                table: table.to_string(),
                stored_max,
                first_new,
            }),
            _ => Ok(()),
        }
    }
}

impl Sink for SqliteSink {
    fn name(&self) -> &str {
        SINK
    }

    fn write(
        &mut self,
        table: &str,
        batch: &RowBatch,
        mode: WriteMode,
    ) -> Result<Location, SinkError> {
        let backend = |err: rusqlite::Error| SinkError::backend(SINK, table, err);
        if mode == WriteMode::Append && self.table_exists(table).map_err(backend)? {
            self.check_continuity(table, batch)?;
        }
        let create = self.create_sql(table, batch);
        let names = batch.column_names();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", "),
            (1..=names.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
        );

        let tx = self.conn.transaction().map_err(backend)?;
        if mode == WriteMode::Create {
            tx.execute(&format!("DROP TABLE IF EXISTS {}", quote(table)), [])
                .map_err(backend)?;
        }
        tx.execute(&create, []).map_err(backend)?;
        {
            let mut stmt = tx.prepare(&insert).map_err(backend)?;
            for row in batch.rows() {
                stmt.execute(params_from_iter(row.into_iter().map(to_sql)))
                    .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;

        *self.written.entry(table.to_string()).or_default() += batch.height();
        debug!(table, mode = %mode, rows = batch.height(), "wrote sqlite table");
        Ok(Location::new(format!("sqlite://{table}"), batch.height()))
    }

    fn finalize(&mut self) -> Result<SinkReport, SinkError> {
        Ok(SinkReport {
            rows: self.written.clone(),
            warnings: Vec::new(),
        })
    }

    fn load_existing_identifier_map(&mut self) -> Result<Option<BTreeMap<String, i64>>, SinkError> {
        let backend = |err: rusqlite::Error| SinkError::backend(SINK, MASK_TABLE, err);
        if !self.table_exists(MASK_TABLE).map_err(backend)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {}, {} FROM {}",
            quote(SOURCE_SUBJECT),
            quote(TARGET_SUBJECT),
            quote(MASK_TABLE)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(backend)?;
        let map = stmt
            .query_map([], |row| {
                let source = value_from_sql(row.get_ref(0)?).canonical();
                Ok((source, row.get::<_, i64>(1)?))
            })
            .map_err(backend)?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(backend)?;
        Ok(Some(map))
    }

    fn load_existing_row_counts(&mut self) -> Result<Option<BTreeMap<String, usize>>, SinkError> {
        let backend = |err: rusqlite::Error| SinkError::backend(SINK, "", err);
        let mut counts = BTreeMap::new();
        for table in self.table_names()? {
            let rows: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", quote(&table)), [], |row| {
                    row.get(0)
                })
                .map_err(backend)?;
            counts.insert(table, usize::try_from(rows).unwrap_or_default());
        }
        Ok((!counts.is_empty()).then_some(counts))
    }

    fn persist_run_log(&mut self, log: &RunLog) -> Result<Location, SinkError> {
        let backend = |err: rusqlite::Error| SinkError::backend(SINK, RUN_LOG_TABLE, err);
        let body = log
            .to_json()
            .map_err(|err| SinkError::backend(SINK, RUN_LOG_TABLE, err))?;
        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (started_at TEXT, finished_at TEXT, dataset TEXT, aborted INTEGER, body TEXT)",
                    quote(RUN_LOG_TABLE)
                ),
                [],
            )
            .map_err(backend)?;
        self.conn
            .execute(
                &format!("INSERT INTO {} VALUES (?1, ?2, ?3, ?4, ?5)", quote(RUN_LOG_TABLE)),
                params![
                    log.started_at.to_rfc3339(),
                    log.finished_at.map(|t| t.to_rfc3339()),
                    log.dataset,
                    log.aborted.is_some(),
                    body
                ],
            )
            .map_err(backend)?;
        let id = self.conn.last_insert_rowid();
        info!(run = id, "persisted run log");
        Ok(Location::new(format!("sqlite://{RUN_LOG_TABLE}/{id}"), 1))
    }
}
