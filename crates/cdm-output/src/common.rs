//! File helpers shared by the file-backed sinks.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use cdm_core::SinkError;
use cdm_model::{Column, RowBatch, RunLog, Value};

pub const RUN_LOG_DIR: &str = "logs";

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> SinkError + '_ {
    move |err| SinkError::Io {
        path: path.to_path_buf(),
        source: err.into(),
    }
}

pub(crate) fn ensure_dir(path: &Path) -> Result<(), SinkError> {
    fs::create_dir_all(path).map_err(io_error(path))
}

/// Writes `batch` as delimited text, with or without a header row.
pub(crate) fn write_delimited<W: Write>(
    writer: W,
    batch: &RowBatch,
    delimiter: u8,
    header: bool,
    path: &Path,
) -> Result<(), SinkError> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(writer);
    if header {
        out.write_record(batch.column_names())
            .map_err(csv_error(path))?;
    }
    for row in batch.rows() {
        out.write_record(row.iter().map(|v| v.canonical()))
            .map_err(csv_error(path))?;
    }
    out.flush().map_err(io_error(path))
}

/// Header of an existing delimited file, `None` when the file is missing or empty.
pub(crate) fn read_header(path: &Path, delimiter: u8) -> Result<Option<Vec<String>>, SinkError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error(path))?;
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record).map_err(csv_error(path))? {
        return Ok(None);
    }
    Ok(Some(record.iter().map(str::to_string).collect()))
}

/// Reads a whole delimited file. Every cell comes back as text; empty
/// cells are null.
pub(crate) fn read_delimited(path: &Path, delimiter: u8) -> Result<RowBatch, SinkError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(csv_error(path))?;
    let names: Vec<String> = reader
        .headers()
        .map_err(csv_error(path))?
        .iter()
        .map(str::to_string)
        .collect();
    let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record.map_err(csv_error(path))?;
        for (idx, column) in values.iter_mut().enumerate() {
            column.push(record.get(idx).map_or(Value::Null, Value::text));
        }
    }
    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, values)| Column::new(name, values))
        .collect();
    Ok(RowBatch::new(columns)?)
}

/// Data rows in a delimited file with a header.
pub(crate) fn count_records(path: &Path, delimiter: u8) -> Result<usize, SinkError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(csv_error(path))?;
    let mut count = 0;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record).map_err(csv_error(path))? {
        count += 1;
    }
    Ok(count)
}

/// Writes through a temp file and renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path).map_err(io_error(&temp_path))?;
    file.write_all(bytes).map_err(io_error(&temp_path))?;
    file.sync_all().map_err(io_error(&temp_path))?;
    fs::rename(&temp_path, path).map_err(io_error(path))
}

/// `logs/<started_at>.json` under `root`.
pub(crate) fn run_log_path(root: &Path, log: &RunLog) -> PathBuf {
    let stamp = log.started_at.format("%Y%m%dT%H%M%S%.6fZ");
    root.join(RUN_LOG_DIR).join(format!("{stamp}.json"))
}

pub(crate) fn run_log_json(log: &RunLog) -> Result<String, SinkError> {
    log.to_json()
        .map_err(|err| SinkError::backend("file", "run_log", err))
}
