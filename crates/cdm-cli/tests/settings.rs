//! Run settings, argument parsers and input loading used by the binary.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tracing::level_filters::LevelFilter;

use cdm_cli::inputs::{collect_sources, load_file_tables};
use cdm_cli::logging::{LogConfig, LogFormat, default_directives};
use cdm_cli::settings::{FieldRef, QuerySpec, RunOverrides, parse_delimiter, resolve_run_config};
use cdm_core::{MASK_TABLE, Sink, WriteMode, mask_entries_batch};
use cdm_model::{Column, FormatPolicy, RowBatch, Value};
use cdm_output::LocalFileSink;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("run.toml");
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn flags_override_the_config_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"
        cdm_version = "5.4"
        chunk_size = 500
        format_policy = "check"
        check_sample_size = 20
        "#,
    );

    let config = resolve_run_config(Some(path.as_path()), &RunOverrides::default()).expect("config");
    assert_eq!(config.cdm_version, "5.4");
    assert_eq!(config.chunk_size, Some(500));
    assert!(!config.resume);

    let overrides = RunOverrides {
        chunk_size: Some(50),
        format_policy: Some(FormatPolicy::Off),
        check_tolerance: Some(0.25),
        resume: true,
        ..RunOverrides::default()
    };
    let config = resolve_run_config(Some(path.as_path()), &overrides).expect("config");
    assert_eq!(config.cdm_version, "5.4");
    assert_eq!(config.chunk_size, Some(50));
    assert_eq!(config.format_policy, FormatPolicy::Off);
    assert_eq!(config.check_sample_size, 20);
    assert!((config.check_tolerance - 0.25).abs() < f64::EPSILON);
    assert!(config.resume);
}

#[test]
fn invalid_settings_are_reported_with_context() {
    let overrides = RunOverrides {
        check_tolerance: Some(1.5),
        ..RunOverrides::default()
    };
    let err = resolve_run_config(None, &overrides).expect_err("tolerance out of range");
    assert_eq!(err.to_string(), "invalid run configuration");
    assert!(format!("{err:#}").contains("check_tolerance"));

    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let err = resolve_run_config(Some(missing.as_path()), &RunOverrides::default()).expect_err("missing");
    assert!(err.to_string().starts_with("load run config"));
}

#[test]
fn argument_parsers() {
    let spec: QuerySpec = "visits = SELECT * FROM visits WHERE a = 1".parse().expect("query");
    assert_eq!(spec.name, "visits");
    assert_eq!(spec.sql, "SELECT * FROM visits WHERE a = 1");
    assert!("no-equals".parse::<QuerySpec>().is_err());
    assert!("=SELECT 1".parse::<QuerySpec>().is_err());

    let field: FieldRef = "person.gender_concept_id".parse().expect("field");
    assert_eq!(field.table, "person");
    assert_eq!(field.field, "gender_concept_id");
    assert!("person".parse::<FieldRef>().is_err());

    assert_eq!(parse_delimiter("tab").expect("tab"), b'\t');
    assert_eq!(parse_delimiter(",").expect("comma"), b',');
    assert!(parse_delimiter(";;").is_err());
}

#[test]
fn sources_are_discovered_from_a_folder() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("Demographics.csv"), "ID,Sex\nP1,M\n").expect("csv");
    fs::write(dir.path().join("Labs.tsv"), "ID\tValue\nP1\t3\n").expect("tsv");
    fs::write(dir.path().join("notes.txt"), "ignored").expect("txt");

    let sources = collect_sources(Some(dir.path()), None, &[]).expect("sources");
    assert_eq!(sources.names(), vec!["Demographics.csv", "Labs.tsv"]);

    let query: QuerySpec = "extra=SELECT 1".parse().expect("query");
    let err = collect_sources(Some(dir.path()), None, &[query]).expect_err("needs a database");
    assert!(err.to_string().contains("--source-db"));

    let empty = TempDir::new().expect("tempdir");
    assert!(collect_sources(Some(empty.path()), None, &[]).is_err());
}

#[test]
fn output_tables_exclude_identifier_state() {
    let dir = TempDir::new().expect("tempdir");
    let mut sink = LocalFileSink::new(dir.path()).expect("sink");
    let person = RowBatch::new(vec![Column::new(
        "person_id",
        vec![Value::Int(1), Value::Int(2)],
    )])
    .expect("batch");
    sink.write("person", &person, WriteMode::Create)
        .expect("person");
    let mask = mask_entries_batch(&[("P1".to_string(), 1)]).expect("mask");
    sink.write(MASK_TABLE, &mask, WriteMode::Create)
        .expect("mask");

    let tables = load_file_tables(dir.path(), b'\t').expect("tables");
    assert_eq!(tables.keys().collect::<Vec<_>>(), vec!["person"]);
    assert_eq!(tables["person"].height(), 2);
}

#[test]
fn log_defaults() {
    let config = LogConfig::default()
        .with_level(LevelFilter::INFO)
        .with_format(LogFormat::Json)
        .with_timestamps(true);
    assert_eq!(config.format, LogFormat::Json);
    assert!(config.use_env_filter);
    assert!(config.log_file.is_none());
    insta::assert_snapshot!(
        default_directives(config.level_filter),
        @"warn,cdm=info,cdm_cli=info,cdm_core=info,cdm_ingest=info,cdm_map=info,cdm_model=info,cdm_output=info,cdm_standards=info,cdm_transform=info"
    );
}
