//! Source collections for a run and persisted tables for analyses.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use cdm_core::MASK_TABLE;
use cdm_ingest::{SourceCollection, SqlQuerySource, discover_sources};
use cdm_model::RowBatch;
use cdm_output::{LocalFileSink, SqliteSink};

use crate::settings::QuerySpec;

/// Every delimited file under `dir` plus one source per query against `db`.
pub fn collect_sources(
    dir: Option<&Path>,
    db: Option<&Path>,
    queries: &[QuerySpec],
) -> Result<SourceCollection> {
    let mut sources = SourceCollection::new();
    if let Some(dir) = dir {
        for source in discover_sources(dir)
            .with_context(|| format!("discover sources in {}", dir.display()))?
        {
            sources
                .add(Box::new(source))
                .context("register file source")?;
        }
    }
    if !queries.is_empty() {
        let Some(db) = db else {
            bail!("--query needs --source-db");
        };
        for query in queries {
            sources
                .add(Box::new(SqlQuerySource::new(&query.name, db, &query.sql)))
                .with_context(|| format!("register query source '{}'", query.name))?;
        }
    }
    if sources.is_empty() {
        bail!("no sources found; pass --sources and/or --source-db with --query");
    }
    info!(sources = sources.len(), "collected sources");
    Ok(sources)
}

/// Mapped tables persisted as delimited files, without the identifier mask.
pub fn load_file_tables(dir: &Path, delimiter: u8) -> Result<BTreeMap<String, RowBatch>> {
    let sink = LocalFileSink::new(dir)
        .with_context(|| format!("open output directory {}", dir.display()))?
        .with_delimiter(delimiter);
    let mut tables = BTreeMap::new();
    for name in sink.table_names().context("list output tables")? {
        if name == MASK_TABLE || name.starts_with('_') {
            continue;
        }
        if let Some(batch) = sink
            .read_table(&name)
            .with_context(|| format!("read table {name}"))?
        {
            tables.insert(name, batch);
        }
    }
    Ok(tables)
}

/// Mapped tables of a SQLite output.
pub fn load_sqlite_tables(path: &Path) -> Result<BTreeMap<String, RowBatch>> {
    if !path.is_file() {
        bail!("database {} does not exist", path.display());
    }
    let sink =
        SqliteSink::open(path).with_context(|| format!("open database {}", path.display()))?;
    let mut tables = BTreeMap::new();
    for name in sink.table_names().context("list database tables")? {
        if let Some(batch) = sink
            .read_table(&name)
            .with_context(|| format!("read table {name}"))?
        {
            tables.insert(name, batch);
        }
    }
    Ok(tables)
}
