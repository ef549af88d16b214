//! Run configuration assembled from an optional TOML file and CLI flags.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use cdm_model::{FormatPolicy, RunConfig};

/// Flags that override the config file. `None` and `false` keep the file's value.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub cdm_version: Option<String>,
    pub chunk_size: Option<usize>,
    pub start_index: Option<i64>,
    pub format_policy: Option<FormatPolicy>,
    pub check_sample_size: Option<usize>,
    pub check_tolerance: Option<f64>,
    pub resume: bool,
    pub log_data: bool,
}

pub fn resolve_run_config(path: Option<&Path>, overrides: &RunOverrides) -> Result<RunConfig> {
    let mut config = match path {
        Some(path) => RunConfig::from_toml_file(path)
            .with_context(|| format!("load run config {}", path.display()))?,
        None => RunConfig::new(),
    };
    if let Some(version) = &overrides.cdm_version {
        config = config.with_cdm_version(version.clone());
    }
    if overrides.chunk_size.is_some() {
        config = config.with_chunk_size(overrides.chunk_size);
    }
    if let Some(start_index) = overrides.start_index {
        config = config.with_start_index(start_index);
    }
    if let Some(policy) = overrides.format_policy {
        config = config.with_format_policy(policy);
    }
    if overrides.check_sample_size.is_some() || overrides.check_tolerance.is_some() {
        let sample = overrides
            .check_sample_size
            .unwrap_or(config.check_sample_size);
        let tolerance = overrides.check_tolerance.unwrap_or(config.check_tolerance);
        config = config.with_check(sample, tolerance);
    }
    if overrides.resume {
        config = config.with_resume(true);
    }
    if overrides.log_data {
        config = config.with_log_data(true);
    }
    config.validate().context("invalid run configuration")?;
    Ok(config)
}

/// A named SQL query source, written `name=SELECT ...` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub name: String,
    pub sql: String,
}

impl FromStr for QuerySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, sql) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=SQL, got '{s}'"))?;
        let (name, sql) = (name.trim(), sql.trim());
        if name.is_empty() || sql.is_empty() {
            return Err(format!("expected NAME=SQL, got '{s}'"));
        }
        Ok(Self {
            name: name.to_string(),
            sql: sql.to_string(),
        })
    }
}

/// `table.field` target of a value frequency analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub table: String,
    pub field: String,
}

impl FromStr for FieldRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((table, field)) if !table.is_empty() && !field.is_empty() => Ok(Self {
                table: table.to_string(),
                field: field.to_string(),
            }),
            _ => Err(format!("expected TABLE.FIELD, got '{s}'")),
        }
    }
}

/// Parses a one-character delimiter; `tab` and `\t` mean a tab.
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => bail!("delimiter must be a single ASCII character, got '{other}'"),
    }
}
