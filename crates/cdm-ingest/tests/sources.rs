//! Tests for chunked sources and the cursor collection.

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use proptest::prelude::*;
use rusqlite::Connection;
use tempfile::TempDir;

use cdm_ingest::{
    Advance, ChunkedSource, CsvFileSource, IngestError, MemorySource, SourceCollection,
    SqlQuerySource, discover_sources, normalize_header,
};
use cdm_model::{CdmError, Column, RowBatch, TableSet, Value};

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write file");
    path
}

fn int_batch(name: &str, rows: i64) -> RowBatch {
    RowBatch::new(vec![Column::new(
        name,
        (1..=rows).map(Value::Int).collect(),
    )])
    .expect("batch")
}

#[test]
fn headers_are_normalized() {
    assert_eq!(normalize_header("\u{feff}Person ID "), "person id");
    assert_eq!(normalize_header("  Birth   Date"), "birth date");
}

#[test]
fn csv_source_reads_in_chunks_and_resets() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_file(
        dir.path(),
        "demo.csv",
        "ID,Sex\n1,M\n2,F\n3,\n4,F\n5,M\n",
    );
    let mut source = CsvFileSource::new(&path).expect("source");
    assert_eq!(source.name(), "demo.csv");
    assert_eq!(source.columns().expect("columns"), vec!["id", "sex"]);

    let first = source.fetch_next(2).expect("first");
    assert_eq!(first.height(), 2);
    let second = source.fetch_next(2).expect("second");
    assert_eq!(second.column("sex").expect("sex").values[1], Value::Null);
    let third = source.fetch_next(2).expect("third");
    assert_eq!(third.height(), 1);
    let done = source.fetch_next(2).expect("done");
    assert!(done.is_empty());
    assert_eq!(done.column_names(), vec!["id", "sex"]);

    source.reset().expect("reset");
    let again = source.fetch_next(10).expect("again");
    assert_eq!(again.height(), 5);
    assert_eq!(again.column("id").expect("id").values[0], Value::text("1"));
}

#[test]
fn tsv_files_use_tab_delimiter() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_file(dir.path(), "visits.tsv", "id\tcode\n1\tA,B\n");
    let mut source = CsvFileSource::new(&path).expect("source");
    let batch = source.fetch_next(10).expect("batch");
    assert_eq!(batch.column("code").expect("code").values[0], Value::text("A,B"));
}

#[test]
fn missing_file_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let err = CsvFileSource::new(dir.path().join("absent.csv")).err();
    assert!(matches!(err, Some(IngestError::FileNotFound { .. })));
}

#[test]
fn discovery_lists_delimited_files_only() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), "b.csv", "x\n1\n");
    write_file(dir.path(), "a.TSV", "x\n1\n");
    write_file(dir.path(), "notes.txt", "ignore me");
    fs::create_dir(dir.path().join("nested.csv")).expect("dir");

    let sources = discover_sources(dir.path()).expect("discover");
    let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["a.TSV", "b.csv"]);

    let missing = discover_sources(&dir.path().join("nope"));
    assert!(matches!(missing, Err(IngestError::DirectoryNotFound { .. })));
}

#[test]
fn sql_source_pages_through_query() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("source.db");
    let conn = Connection::open(&db).expect("open");
    conn.execute_batch(
        "CREATE TABLE patients (id INTEGER, name TEXT, weight REAL);
         INSERT INTO patients VALUES (1, 'a', 70.5), (2, 'b', NULL), (3, '', 80.0);",
    )
    .expect("seed");
    drop(conn);

    let mut source = SqlQuerySource::table(&db, "patients");
    assert_eq!(source.columns().expect("columns"), vec!["id", "name", "weight"]);

    let first = source.fetch_next(2).expect("first");
    assert_eq!(first.height(), 2);
    assert_eq!(first.column("weight").expect("weight").values[1], Value::Null);
    let second = source.fetch_next(2).expect("second");
    assert_eq!(second.height(), 1);
    assert_eq!(second.column("name").expect("name").values[0], Value::Null);
    assert!(source.fetch_next(2).expect("done").is_empty());

    source.reset().expect("reset");
    assert_eq!(source.fetch_next(usize::MAX).expect("all").height(), 3);
}

#[test]
fn memory_source_from_dataframe() {
    let df = df!(
        "id" => [1i64, 2, 3],
        "code" => ["x", "", "z"],
    )
    .expect("frame");
    let mut source = MemorySource::from_dataframe("codes", &df).expect("source");
    let batch = source.fetch_next(10).expect("batch");
    assert_eq!(batch.column("id").expect("id").values[2], Value::Int(3));
    assert_eq!(batch.column("code").expect("code").values[1], Value::Null);
}

#[test]
fn collection_advances_until_all_exhausted() {
    let mut sources = SourceCollection::new()
        .with_source(MemorySource::new("long", int_batch("a", 5)))
        .expect("add long")
        .with_source(MemorySource::new("short", int_batch("b", 2)))
        .expect("add short");
    let names = ["long", "short"];

    assert_eq!(sources.initialize(&names, 2).expect("init"), Advance::Advanced);
    assert_eq!(sources.table("long").expect("long").height(), 2);

    assert_eq!(sources.advance(&names, 2).expect("second"), Advance::Advanced);
    assert!(sources.table("short").expect("short").is_empty());
    assert!(sources.cursor("short").expect("cursor").is_exhausted());

    assert_eq!(sources.advance(&names, 2).expect("third"), Advance::Advanced);
    assert_eq!(sources.table("long").expect("long").height(), 1);
    assert_eq!(sources.advance(&names, 2).expect("fourth"), Advance::Exhausted);

    sources.reset(&names).expect("reset");
    assert_eq!(sources.initialize(&names, 10).expect("reinit"), Advance::Advanced);
    assert_eq!(sources.table("long").expect("long").height(), 5);
}

#[test]
fn advancing_uninitialized_source_fails() {
    let mut sources = SourceCollection::new()
        .with_source(MemorySource::new("t", int_batch("a", 1)))
        .expect("add");
    let err = sources.advance(&["t"], 1).err();
    assert!(matches!(err, Some(IngestError::NotInitialized { .. })));
    let unknown = sources.initialize(&["missing"], 1).err();
    assert!(matches!(unknown, Some(IngestError::UnknownSource { .. })));
}

#[test]
fn duplicate_source_names_are_rejected() {
    let mut sources = SourceCollection::new();
    sources
        .add(Box::new(MemorySource::new("t", RowBatch::empty())))
        .expect("first");
    let err = sources
        .add(Box::new(MemorySource::new("t", RowBatch::empty())))
        .err();
    assert!(matches!(err, Some(IngestError::DuplicateSource { .. })));
}

#[test]
fn check_inputs_reports_every_missing_name() {
    let sources = SourceCollection::new()
        .with_source(MemorySource::new("Demographics.csv", RowBatch::empty()))
        .expect("add");
    let resolved = sources
        .check_inputs(["demographics.csv"])
        .expect("case-insensitive match");
    assert_eq!(resolved, vec!["Demographics.csv"]);

    let err = sources.check_inputs(["labs.csv", "visits.csv"]).err();
    match err {
        Some(CdmError::MissingInputFiles { missing }) => {
            assert_eq!(missing, vec!["labs.csv", "visits.csv"]);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

proptest! {
    #[test]
    fn chunked_reads_cover_every_row(rows in 0i64..40, chunk in 1usize..9) {
        let mut source = MemorySource::new("t", int_batch("a", rows));
        let mut seen = Vec::new();
        loop {
            let batch = source.fetch_next(chunk).expect("fetch");
            if batch.is_empty() {
                break;
            }
            prop_assert!(batch.height() <= chunk);
            seen.extend(batch.column("a").expect("a").values.clone());
        }
        let expected: Vec<Value> = (1..=rows).map(Value::Int).collect();
        prop_assert_eq!(seen, expected);
    }
}
