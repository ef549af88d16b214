//! Streaming delimited-file source.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{Reader, ReaderBuilder, StringRecord};
use tracing::debug;

use cdm_model::{Column, RowBatch, Value};

use crate::error::{IngestError, Result};
use crate::source::ChunkedSource;

/// Trims, strips a byte-order mark, collapses inner whitespace and lower-cases.
pub fn normalize_header(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('\u{feff}');
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn delimiter_for(path: &Path) -> u8 {
    let is_tsv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));
    if is_tsv { b'\t' } else { b',' }
}

/// Reads a CSV or TSV file a slice at a time, keeping the reader open
/// between fetches.
pub struct CsvFileSource {
    name: String,
    path: PathBuf,
    delimiter: u8,
    reader: Option<Reader<File>>,
    headers: Vec<String>,
    rows_read: usize,
}

impl CsvFileSource {
    /// Creates a source named after the file name.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| IngestError::FileNotFound { path: path.clone() })?;
        Self::with_name(name, path)
    }

    pub fn with_name(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(IngestError::FileNotFound { path });
        }
        Ok(Self {
            name: name.into(),
            delimiter: delimiter_for(&path),
            path,
            reader: None,
            headers: Vec::new(),
            rows_read: 0,
        })
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_error(&self, err: &csv::Error) -> IngestError {
        IngestError::CsvParse {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(false)
            .from_path(&self.path)
            .map_err(|err| self.parse_error(&err))?;
        let headers = reader.headers().map_err(|err| self.parse_error(&err))?;
        self.headers = headers.iter().map(normalize_header).collect();
        self.reader = Some(reader);
        self.rows_read = 0;
        Ok(())
    }
}

impl ChunkedSource for CsvFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_next(&mut self, size_hint: usize) -> Result<RowBatch> {
        self.open()?;
        let width = self.headers.len();
        let mut values: Vec<Vec<Value>> = vec![Vec::new(); width];
        let mut record = StringRecord::new();
        let mut fetched = 0;
        while fetched < size_hint {
            let Some(reader) = self.reader.as_mut() else {
                break;
            };
            let more = match reader.read_record(&mut record) {
                Ok(more) => more,
                Err(err) => return Err(self.parse_error(&err)),
            };
            if !more {
                break;
            }
            for (idx, column) in values.iter_mut().enumerate() {
                column.push(Value::text(record.get(idx).unwrap_or("")));
            }
            fetched += 1;
        }
        self.rows_read += fetched;
        debug!(
            source = %self.name,
            rows = fetched,
            rows_read = self.rows_read,
            "fetched csv chunk"
        );
        let columns = self
            .headers
            .iter()
            .zip(values)
            .map(|(name, values)| Column::new(name.clone(), values))
            .collect();
        Ok(RowBatch::new(columns)?)
    }

    fn reset(&mut self) -> Result<()> {
        self.reader = None;
        self.rows_read = 0;
        Ok(())
    }

    fn columns(&mut self) -> Result<Vec<String>> {
        self.open()?;
        Ok(self.headers.clone())
    }
}
