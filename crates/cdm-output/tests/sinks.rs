//! Sink behavior against real files, a SQLite database and a scripted job queue.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use cdm_core::{MASK_TABLE, Sink, SinkError, WriteMode, mask_entries_batch};
use cdm_model::{
    Column, FieldDefinition, LogicalType, RowBatch, RunLog, TableDefinition, Value,
};
use cdm_output::{
    JobQueueClient, JobQueueSink, JobStatus, LocalFileSink, PollPolicy, RUN_LOG_DIR,
    RUN_LOG_TABLE, SqliteSink,
};

fn person_batch(ids: &[i64]) -> RowBatch {
    RowBatch::new(vec![
        Column::new("person_id", ids.iter().copied().map(Value::Int).collect()),
        Column::new(
            "person_source_value",
            ids.iter().map(|i| Value::Text(format!("P{i}"))).collect(),
        ),
    ])
    .expect("batch")
}

fn person_definition() -> TableDefinition {
    TableDefinition::new(
        "person",
        vec![
            FieldDefinition::new("person_id", LogicalType::Integer).primary_key(),
            FieldDefinition::new("person_source_value", LogicalType::Text { max_len: Some(50) }),
        ],
    )
    .identity()
}

#[test]
fn file_sink_creates_then_appends_without_repeating_the_header() {
    let dir = TempDir::new().expect("tempdir");
    let mut sink = LocalFileSink::new(dir.path()).expect("sink");
    sink.write("person", &person_batch(&[1, 2]), WriteMode::Create)
        .expect("create");
    sink.write("person", &person_batch(&[3]), WriteMode::Append)
        .expect("append");

    let contents = fs::read_to_string(dir.path().join("person.tsv")).expect("read");
    insta::assert_snapshot!(contents, @r"
    person_id	person_source_value
    1	P1
    2	P2
    3	P3
    ");

    // Create truncates.
    sink.write("person", &person_batch(&[9]), WriteMode::Create)
        .expect("recreate");
    let batch = sink.read_table("person").expect("read").expect("table");
    assert_eq!(batch.height(), 1);
    assert_eq!(batch.column("person_id").expect("id").values, vec![Value::from("9")]);

    let report = sink.finalize().expect("finalize");
    assert_eq!(report.rows.get("person"), Some(&4));
}

#[test]
fn file_sink_append_to_a_new_file_writes_a_header() {
    let dir = TempDir::new().expect("tempdir");
    let mut sink = LocalFileSink::new(dir.path()).expect("sink").with_delimiter(b',');
    sink.write("person", &person_batch(&[1]), WriteMode::Append)
        .expect("append");
    let contents = fs::read_to_string(dir.path().join("person.csv")).expect("read");
    assert_eq!(contents, "person_id,person_source_value\n1,P1\n");
}

#[test]
fn file_sink_rejects_a_mismatched_header_on_append() {
    let dir = TempDir::new().expect("tempdir");
    let mut sink = LocalFileSink::new(dir.path()).expect("sink");
    sink.write("person", &person_batch(&[1]), WriteMode::Create)
        .expect("create");
    let other = RowBatch::new(vec![Column::new("person_id", vec![Value::Int(2)])]).expect("batch");
    let err = sink
        .write("person", &other, WriteMode::Append)
        .expect_err("mismatch");
    assert!(matches!(err, SinkError::HeaderMismatch { .. }), "{err}");
}

#[test]
fn file_sink_reports_persisted_state() {
    let dir = TempDir::new().expect("tempdir");
    let mut sink = LocalFileSink::new(dir.path()).expect("sink");
    assert_eq!(sink.load_existing_identifier_map().expect("map"), None);
    assert_eq!(sink.load_existing_row_counts().expect("counts"), None);

    sink.write("person", &person_batch(&[1, 2, 3]), WriteMode::Create)
        .expect("person");
    let entries = vec![("P1".to_string(), 1), ("P2".to_string(), 2)];
    sink.write(MASK_TABLE, &mask_entries_batch(&entries).expect("mask"), WriteMode::Create)
        .expect("mask");

    let map = sink.load_existing_identifier_map().expect("map").expect("present");
    assert_eq!(map, BTreeMap::from([("P1".to_string(), 1), ("P2".to_string(), 2)]));
    let counts = sink.load_existing_row_counts().expect("counts").expect("present");
    assert_eq!(counts, BTreeMap::from([("person".to_string(), 3)]));

    let mut log = RunLog::new("demo", "5.3.1");
    log.finish();
    let location = sink.persist_run_log(&log).expect("log");
    let logs: Vec<_> = fs::read_dir(dir.path().join(RUN_LOG_DIR))
        .expect("logs dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].display().to_string(), location.uri);
    let parsed: RunLog =
        serde_json::from_str(&fs::read_to_string(&logs[0]).expect("read")).expect("json");
    assert_eq!(parsed.dataset, "demo");
}

#[test]
fn sqlite_sink_replaces_and_appends_in_transactions() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("cdm.db");
    let mut sink = SqliteSink::open(&path)
        .expect("open")
        .with_definitions([&person_definition()]);

    sink.write("person", &person_batch(&[1, 2]), WriteMode::Create)
        .expect("create");
    sink.write("person", &person_batch(&[3, 4]), WriteMode::Append)
        .expect("append");
    let stored = sink.read_table("person").expect("read").expect("table");
    assert_eq!(
        stored.column("person_id").expect("id").values,
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
    );

    sink.write("person", &person_batch(&[7]), WriteMode::Create)
        .expect("replace");
    assert_eq!(sink.read_table("person").expect("read").expect("table").height(), 1);
    assert!(sink.read_table("visit").expect("read").is_none());
}

#[test]
fn sqlite_sink_checks_primary_key_continuity() {
    let mut sink = SqliteSink::in_memory()
        .expect("open")
        .with_definitions([&person_definition()]);
    sink.write("person", &person_batch(&[1, 2, 3]), WriteMode::Create)
        .expect("create");
    let err = sink
        .write("person", &person_batch(&[3, 4]), WriteMode::Append)
        .expect_err("overlap");
    assert!(matches!(
        err,
        SinkError::KeyContinuity { stored_max: 3, first_new: 3, .. }
    ));
    // The failed append left the table untouched.
    assert_eq!(sink.read_table("person").expect("read").expect("table").height(), 3);
}

#[test]
fn sqlite_sink_round_trips_state_and_run_logs() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("cdm.db");
    {
        let mut sink = SqliteSink::open(&path).expect("open");
        let entries = vec![("P1".to_string(), 1), ("P2".to_string(), 2)];
        sink.write(MASK_TABLE, &mask_entries_batch(&entries).expect("mask"), WriteMode::Create)
            .expect("mask");
        sink.write("person", &person_batch(&[1, 2]), WriteMode::Create)
            .expect("person");
        let mut log = RunLog::new("demo", "5.3.1");
        log.aborted = Some("stopped".to_string());
        sink.persist_run_log(&log).expect("log");
    }

    let mut sink = SqliteSink::open(&path).expect("reopen");
    let map = sink.load_existing_identifier_map().expect("map").expect("present");
    assert_eq!(map.get("P2"), Some(&2));
    let counts = sink.load_existing_row_counts().expect("counts").expect("present");
    assert_eq!(counts, BTreeMap::from([("person".to_string(), 2)]));

    let (body, aborted): (String, bool) = sink
        .connection()
        .query_row(
            &format!("SELECT body, aborted FROM {RUN_LOG_TABLE}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("run log row");
    assert!(aborted);
    let parsed: RunLog = serde_json::from_str(&body).expect("json");
    assert_eq!(parsed.aborted.as_deref(), Some("stopped"));
}

/// Answers status checks from a per-job script; the last entry repeats.
#[derive(Default)]
struct ScriptedClient {
    scripts: BTreeMap<String, VecDeque<JobStatus>>,
    submitted: Vec<(String, String, WriteMode)>,
    status_calls: usize,
}

impl ScriptedClient {
    fn with_script(mut self, table: &str, statuses: Vec<JobStatus>) -> Self {
        self.scripts.insert(table.to_string(), statuses.into());
        self
    }
}

impl JobQueueClient for ScriptedClient {
    fn submit(&mut self, table: &str, file: &Path, mode: WriteMode) -> Result<String, SinkError> {
        assert!(file.exists(), "staged file is written before submission");
        let id = format!("{table}-{}", self.submitted.len() + 1);
        self.submitted.push((id.clone(), table.to_string(), mode));
        Ok(id)
    }

    fn status(&mut self, job_id: &str) -> Result<JobStatus, SinkError> {
        self.status_calls += 1;
        let table = job_id.rsplit_once('-').map_or(job_id, |(t, _)| t);
        let script = self.scripts.entry(table.to_string()).or_default();
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(status.unwrap_or(JobStatus::Done { rejected: 0 }))
    }
}

fn quick_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy {
        max_attempts,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

#[test]
fn job_queue_surfaces_partial_failures_as_warnings() {
    let dir = TempDir::new().expect("tempdir");
    let state = LocalFileSink::new(dir.path().join("state")).expect("state");
    let client = ScriptedClient::default()
        .with_script(
            "person",
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Done { rejected: 1 }],
        )
        .with_script("observation", vec![JobStatus::Failed("bad column".to_string())])
        .with_script("measurement", vec![JobStatus::Running]);
    let mut sink = JobQueueSink::new(client, dir.path().join("staging"), state)
        .expect("sink")
        .with_policy(quick_policy(4));

    sink.write("person", &person_batch(&[1, 2, 3]), WriteMode::Create)
        .expect("person");
    sink.write("observation", &person_batch(&[1]), WriteMode::Create)
        .expect("observation");
    sink.write("measurement", &person_batch(&[1]), WriteMode::Append)
        .expect("measurement");
    assert_eq!(sink.pending_jobs(), 3);

    let report = sink.finalize().expect("finalize never fails on job outcomes");
    assert_eq!(sink.pending_jobs(), 0);
    assert_eq!(report.warnings.len(), 3, "{:?}", report.warnings);
    assert!(report.warnings[0].contains("rejected 1 of 3 rows"));
    assert!(report.warnings[1].contains("bad column"));
    assert!(report.warnings[2].contains("did not settle after 4 attempts"));
    assert_eq!(report.rows.get("person"), Some(&2));

    let counts = sink.load_existing_row_counts().expect("counts").expect("present");
    assert_eq!(counts.get("person"), Some(&2));
    assert_eq!(counts.get("observation"), Some(&0));
    let modes: Vec<WriteMode> = sink.client().submitted.iter().map(|s| s.2).collect();
    assert_eq!(
        modes,
        vec![WriteMode::Create, WriteMode::Create, WriteMode::Append]
    );
}

#[test]
fn job_queue_mirrors_identifier_state_locally() {
    let dir = TempDir::new().expect("tempdir");
    let state = LocalFileSink::new(dir.path().join("state")).expect("state");
    let mut sink = JobQueueSink::new(ScriptedClient::default(), dir.path().join("staging"), state)
        .expect("sink")
        .with_policy(quick_policy(2));
    let entries = vec![("P1".to_string(), 1)];
    sink.write(MASK_TABLE, &mask_entries_batch(&entries).expect("mask"), WriteMode::Create)
        .expect("mask");
    sink.finalize().expect("finalize");
    sink.persist_run_log(&RunLog::new("demo", "5.3.1")).expect("log");

    let map = sink.load_existing_identifier_map().expect("map").expect("present");
    assert_eq!(map.get("P1"), Some(&1));
    assert!(sink.state().table_path(MASK_TABLE).exists());
    assert!(dir.path().join("state").join(RUN_LOG_DIR).is_dir());
    assert_eq!(sink.client().submitted.len(), 1);
}

#[cfg(unix)]
#[test]
fn command_client_renders_templates() {
    use cdm_output::CommandJobClient;

    let dir = TempDir::new().expect("tempdir");
    let staged = dir.path().join("person-00001.tsv");
    fs::write(&staged, "person_id\n1\n").expect("stage");
    let mut client = CommandJobClient::new(
        "test -f {file} && echo job-{table}-{mode}",
        "echo RUNNING; echo DONE rejected=2 for {job_id}",
    );
    let id = client
        .submit("person", &staged, WriteMode::Append)
        .expect("submit");
    assert_eq!(id, "job-person-append");
    assert!(matches!(
        client.status(&id),
        Err(SinkError::JobSubmit { .. })
    ));

    let mut client = CommandJobClient::new("echo id-1", "echo DONE rejected=2");
    assert_eq!(
        client.status("id-1").expect("status"),
        JobStatus::Done { rejected: 2 }
    );
    let mut failing = CommandJobClient::new("exit 3", "echo DONE");
    assert!(matches!(
        failing.submit("person", &staged, WriteMode::Create),
        Err(SinkError::JobSubmit { .. })
    ));
}
