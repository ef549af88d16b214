//! Input file discovery.

use std::path::{Path, PathBuf};

use crate::csv_source::CsvFileSource;
use crate::error::{IngestError, Result};

/// Lists `.csv` and `.tsv` files in a directory, sorted by file name.
pub fn list_delimited_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::DirectoryRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry_result in entries {
        let entry = entry_result.map_err(|e| IngestError::DirectoryRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_delimited = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("tsv"));
        if is_delimited {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// One file source per delimited file, named by file name.
pub fn discover_sources(dir: &Path) -> Result<Vec<CsvFileSource>> {
    list_delimited_files(dir)?
        .into_iter()
        .map(CsvFileSource::new)
        .collect()
}
