//! One delimited file per table under a root directory.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use cdm_core::{
    Location, MASK_TABLE, Sink, SinkError, SinkReport, WriteMode, identifier_map_from_batch,
};
use cdm_model::{RowBatch, RunLog};

use crate::common::{
    count_records, ensure_dir, io_error, read_delimited, read_header,
    run_log_json, run_log_path, write_atomic, write_delimited,
};

/// Writes `<root>/<table>.tsv` (or `.csv` for a comma delimiter).
#[derive(Debug, Clone)]
pub struct LocalFileSink {
    root: PathBuf,
    delimiter: u8,
    written: BTreeMap<String, usize>,
}

impl LocalFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self {
            root,
            delimiter: b'\t',
            written: BTreeMap::new(),
        })
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn extension(&self) -> &'static str {
        if self.delimiter == b',' { "csv" } else { "tsv" }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.{}", self.extension()))
    }

    /// Reads a written table back. Values come back as text.
    pub fn read_table(&self, table: &str) -> Result<Option<RowBatch>, SinkError> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(None);
        }
        read_delimited(&path, self.delimiter).map(Some)
    }

    /// Tables with a file under the root, by file stem.
    pub fn table_names(&self) -> Result<Vec<String>, SinkError> {
        let entries = fs::read_dir(&self.root).map_err(io_error(&self.root))?;
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_error(&self.root))?.path();
            let is_table = path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(self.extension());
            if !is_table {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn check_header(&self, path: &Path, batch: &RowBatch) -> Result<bool, SinkError> {
        let Some(existing) = read_header(path, self.delimiter)? else {
            return Ok(false);
        };
        let expected = batch.column_names();
        if existing != expected {
            return Err(SinkError::HeaderMismatch {
                path: path.to_path_buf(),
                expected: expected.join(", "),
                found: existing.join(", "),
            });
        }
        Ok(true)
    }
}

impl Sink for LocalFileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write(
        &mut self,
        table: &str,
        batch: &RowBatch,
        mode: WriteMode,
    ) -> Result<Location, SinkError> {
        let path = self.table_path(table);
        let file = match mode {
            WriteMode::Create => {
                let file = File::create(&path).map_err(io_error(&path))?;
                write_delimited(&file, batch, self.delimiter, true, &path)?;
                file
            }
            WriteMode::Append => {
                let has_header = self.check_header(&path, batch)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(io_error(&path))?;
                write_delimited(&file, batch, self.delimiter, !has_header, &path)?;
                file
            }
        };
        file.sync_all().map_err(io_error(&path))?;
        *self.written.entry(table.to_string()).or_default() += batch.height();
        debug!(table, mode = %mode, rows = batch.height(), path = %path.display(), "wrote delimited file");
        Ok(Location::new(path.display().to_string(), batch.height()))
    }

    fn finalize(&mut self) -> Result<SinkReport, SinkError> {
        Ok(SinkReport {
            rows: self.written.clone(),
            warnings: Vec::new(),
        })
    }

    fn load_existing_identifier_map(&mut self) -> Result<Option<BTreeMap<String, i64>>, SinkError> {
        let Some(batch) = self.read_table(MASK_TABLE)? else {
            return Ok(None);
        };
        Ok(Some(identifier_map_from_batch(&batch)?))
    }

    fn load_existing_row_counts(&mut self) -> Result<Option<BTreeMap<String, usize>>, SinkError> {
        let mut counts = BTreeMap::new();
        for table in self.table_names()? {
            if table == MASK_TABLE {
                continue;
            }
            let rows = count_records(&self.table_path(&table), self.delimiter)?;
            counts.insert(table, rows);
        }
        Ok((!counts.is_empty()).then_some(counts))
    }

    fn persist_run_log(&mut self, log: &RunLog) -> Result<Location, SinkError> {
        let path = run_log_path(&self.root, log);
        write_atomic(&path, run_log_json(log)?.as_bytes())?;
        info!(path = %path.display(), "persisted run log");
        Ok(Location::new(path.display().to_string(), 1))
    }
}
