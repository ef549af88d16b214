//! Full mapping runs from delimited source files into the persistent sinks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use cdm_core::{MASK_TABLE, Orchestrator, RunError, RunSummary, SOURCE_SUBJECT, Sink};
use cdm_ingest::{SourceCollection, discover_sources};
use cdm_model::{
    FieldDefinition, LogicalType, MappingRule, RuleDocument, RunConfig, TableDefinition,
    TermMapping, Value,
};
use cdm_output::{LocalFileSink, RUN_LOG_DIR, SqliteSink};
use cdm_standards::SchemaVersion;

fn schema() -> SchemaVersion {
    use LogicalType::{Date, Integer, Timestamp};
    SchemaVersion::new(
        "5.3.1",
        vec![
            TableDefinition::new(
                "person",
                vec![
                    FieldDefinition::new("person_id", Integer).primary_key(),
                    FieldDefinition::new("gender_concept_id", Integer).required(),
                    FieldDefinition::new("year_of_birth", Integer).required(),
                    FieldDefinition::new("birth_datetime", Timestamp),
                    FieldDefinition::new("person_source_value", LogicalType::Text {
                        max_len: Some(50),
                    }),
                ],
            )
            .identity(),
            TableDefinition::new(
                "condition_occurrence",
                vec![
                    FieldDefinition::new("condition_occurrence_id", Integer).primary_key(),
                    FieldDefinition::new("person_id", Integer).required(),
                    FieldDefinition::new("condition_concept_id", Integer).required(),
                    FieldDefinition::new("condition_start_date", Date).required(),
                ],
            ),
        ],
    )
}

fn rules() -> RuleDocument {
    let gender = TermMapping::Map(BTreeMap::from([
        ("M".to_string(), Value::Int(8507)),
        ("F".to_string(), Value::Int(8532)),
    ]));
    let person = BTreeMap::from([
        ("person_id".to_string(), MappingRule::new("demographics.csv", "id")),
        (
            "gender_concept_id".to_string(),
            MappingRule::new("demographics.csv", "sex").with_term_mapping(gender),
        ),
        (
            "birth_datetime".to_string(),
            MappingRule::new("demographics.csv", "birth_date"),
        ),
        (
            "person_source_value".to_string(),
            MappingRule::new("demographics.csv", "id"),
        ),
    ]);
    let condition = BTreeMap::from([
        ("person_id".to_string(), MappingRule::new("diagnoses.tsv", "id")),
        (
            "condition_concept_id".to_string(),
            MappingRule::new("diagnoses.tsv", "code"),
        ),
        (
            "condition_start_date".to_string(),
            MappingRule::new("diagnoses.tsv", "date"),
        ),
    ]);

    let mut document = RuleDocument::default();
    document.metadata.dataset = "files".to_string();
    document.cdm.insert(
        "person".to_string(),
        BTreeMap::from([("demographics".to_string(), person)]),
    );
    document.cdm.insert(
        "condition_occurrence".to_string(),
        BTreeMap::from([("diagnoses".to_string(), condition)]),
    );
    document
}

fn write_sources(dir: &Path, people: &[(&str, &str, &str)], diagnoses: &[(&str, &str, &str)]) {
    fs::create_dir_all(dir).expect("source dir");
    let mut demographics = String::from("id,sex,birth_date\n");
    for (id, sex, birth) in people {
        demographics.push_str(&format!("{id},{sex},{birth}\n"));
    }
    fs::write(dir.join("demographics.csv"), demographics).expect("demographics");
    let mut conditions = String::from("id\tcode\tdate\n");
    for (id, code, date) in diagnoses {
        conditions.push_str(&format!("{id}\t{code}\t{date}\n"));
    }
    fs::write(dir.join("diagnoses.tsv"), conditions).expect("diagnoses");
}

fn collection(dir: &Path) -> SourceCollection {
    let mut sources = SourceCollection::new();
    for source in discover_sources(dir).expect("discover") {
        sources.add(Box::new(source)).expect("add source");
    }
    sources
}

fn run<S: Sink>(config: RunConfig, dir: &Path, sink: S) -> (Result<RunSummary, RunError>, S) {
    let schema = schema();
    let mut orchestrator = Orchestrator::new(config, &schema, rules(), collection(dir), sink);
    let outcome = orchestrator.run();
    (outcome, orchestrator.into_sink())
}

fn column_text(sink: &LocalFileSink, table: &str, column: &str) -> Vec<String> {
    sink.read_table(table)
        .expect("read")
        .expect("table")
        .column(column)
        .expect("column")
        .values
        .iter()
        .map(Value::canonical)
        .collect()
}

#[test]
fn file_run_writes_tables_mask_and_log() {
    let dir = TempDir::new().expect("tempdir");
    let sources = dir.path().join("sources");
    write_sources(
        &sources,
        &[
            ("A1", "M", "1970-05-06 07:08:09"),
            ("A2", "F", "1981-01-02 00:00:00"),
            ("A3", "X", "1990-01-01 00:00:00"),
        ],
        &[
            ("A2", "201826", "2020-01-01 08:00:00"),
            ("A1", "320128", "2020-02-01 09:30:00"),
            ("Z9", "201826", "2020-03-01 10:00:00"),
        ],
    );
    let sink = LocalFileSink::new(dir.path().join("out")).expect("sink");
    let (outcome, sink) = run(RunConfig::new().with_chunk_size(Some(2)), &sources, sink);
    let summary = outcome.expect("run");

    // A3 has an unmapped sex code, so the required gender drops it.
    assert_eq!(column_text(&sink, "person", "person_id"), vec!["1", "2"]);
    assert_eq!(column_text(&sink, "person", "year_of_birth"), vec!["1970", "1981"]);
    assert_eq!(
        column_text(&sink, "condition_occurrence", "person_id"),
        vec!["2", "1"]
    );
    assert_eq!(
        column_text(&sink, "condition_occurrence", "condition_start_date"),
        vec!["2020-01-01", "2020-02-01"]
    );
    assert_eq!(column_text(&sink, MASK_TABLE, SOURCE_SUBJECT), vec!["A1", "A2"]);

    let log = summary.run_log.table("condition_occurrence").expect("log");
    assert_eq!(log.orphaned_rows, 1);
    assert_eq!(
        fs::read_dir(dir.path().join("out").join(RUN_LOG_DIR))
            .expect("logs")
            .count(),
        1
    );
}

#[test]
fn file_run_resumes_where_the_last_one_stopped() {
    let dir = TempDir::new().expect("tempdir");
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    let out = dir.path().join("out");
    write_sources(
        &first,
        &[("A1", "M", "1970-05-06 07:08:09"), ("A2", "F", "1981-01-02 00:00:00")],
        &[("A1", "201826", "2020-01-01 08:00:00")],
    );
    write_sources(
        &second,
        &[("B1", "F", "1999-12-31 23:59:59")],
        &[
            ("B1", "437663", "2021-06-15 12:00:00"),
            ("A2", "320128", "2021-07-01 00:00:00"),
        ],
    );

    let (outcome, _) = run(
        RunConfig::new(),
        &first,
        LocalFileSink::new(&out).expect("sink"),
    );
    outcome.expect("first run");

    let (outcome, sink) = run(
        RunConfig::new().with_resume(true),
        &second,
        LocalFileSink::new(&out).expect("sink"),
    );
    let summary = outcome.expect("second run");

    assert_eq!(column_text(&sink, "person", "person_id"), vec!["1", "2", "3"]);
    assert_eq!(
        column_text(&sink, "person", "person_source_value"),
        vec!["A1", "A2", "B1"]
    );
    assert_eq!(
        column_text(&sink, "condition_occurrence", "condition_occurrence_id"),
        vec!["1", "2", "3"]
    );
    // A2 was masked by the first run and is still known.
    assert_eq!(
        column_text(&sink, "condition_occurrence", "person_id"),
        vec!["1", "3", "2"]
    );
    assert_eq!(summary.run_log.new_identifiers, 1);
    assert_eq!(
        summary.run_log.table("person").map(|t| t.existing_rows),
        Some(2)
    );
}

#[test]
fn sqlite_run_keeps_typed_columns_across_resumes() {
    let dir = TempDir::new().expect("tempdir");
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    let db = dir.path().join("cdm.db");
    write_sources(
        &first,
        &[("A1", "M", "1970-05-06 07:08:09")],
        &[("A1", "201826", "2020-01-01 08:00:00")],
    );
    write_sources(
        &second,
        &[("B1", "F", "1999-12-31 23:59:59")],
        &[("B1", "437663", "2021-06-15 12:00:00")],
    );

    let schema = schema();
    let open = || {
        SqliteSink::open(&db)
            .expect("open")
            .with_definitions(schema.tables())
    };
    let (outcome, _) = run(RunConfig::new(), &first, open());
    outcome.expect("first run");
    let (outcome, sink) = run(RunConfig::new().with_resume(true), &second, open());
    outcome.expect("second run");

    let person = sink.read_table("person").expect("read").expect("person");
    assert_eq!(
        person.column("person_id").expect("id").values,
        vec![Value::Int(1), Value::Int(2)]
    );
    assert_eq!(
        person.column("gender_concept_id").expect("gender").values,
        vec![Value::Int(8507), Value::Int(8532)]
    );
    let conditions = sink
        .read_table("condition_occurrence")
        .expect("read")
        .expect("conditions");
    assert_eq!(
        conditions.column("condition_occurrence_id").expect("id").values,
        vec![Value::Int(1), Value::Int(2)]
    );
    let logged: i64 = sink
        .connection()
        .query_row("SELECT COUNT(*) FROM _cdm_run_log", [], |row| row.get(0))
        .expect("run logs");
    assert_eq!(logged, 2);
}
