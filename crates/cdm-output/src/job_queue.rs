//! Sink that hands every write to an external load queue.
//!
//! Each write is staged as a delimited file and submitted as one job.
//! `finalize` polls every job until it settles. Rejected rows, failed jobs
//! and jobs that never settle become warnings in the [`SinkReport`]; they
//! do not fail the run. Identifier state and run logs are also mirrored to
//! a local file sink so a later run can resume from them.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use cdm_core::{Location, MASK_TABLE, Sink, SinkError, SinkReport, WriteMode};
use cdm_model::{Column, RowBatch, RunLog, Value};

use crate::common::{ensure_dir, io_error, write_delimited};
use crate::delimited::LocalFileSink;

/// State table holding rows accepted per table across runs.
pub const ROW_COUNT_TABLE: &str = "_cdm_row_counts";

const SINK: &str = "job-queue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done { rejected: usize },
    Failed(String),
}

impl JobStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Done { .. } | JobStatus::Failed(_))
    }
}

impl FromStr for JobStatus {
    type Err = String;

    /// `PENDING`, `RUNNING`, `DONE [rejected=N]` or `FAILED <message>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));
        match word.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "DONE" => {
                let rejected = match rest.strip_prefix("rejected=") {
                    Some(n) => n
                        .trim()
                        .parse()
                        .map_err(|_| format!("bad rejected count in '{line}'"))?,
                    None if rest.is_empty() => 0,
                    None => return Err(format!("unexpected status detail in '{line}'")),
                };
                Ok(JobStatus::Done { rejected })
            }
            "FAILED" => Ok(JobStatus::Failed(rest.to_string())),
            _ => Err(format!("unrecognized job status '{line}'")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("PENDING"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::Done { rejected: 0 } => f.write_str("DONE"),
            JobStatus::Done { rejected } => write!(f, "DONE rejected={rejected}"),
            JobStatus::Failed(message) => write!(f, "FAILED {message}"),
        }
    }
}

/// Submits load jobs and reports their status.
pub trait JobQueueClient {
    /// Returns the job id.
    fn submit(&mut self, table: &str, file: &Path, mode: WriteMode) -> Result<String, SinkError>;

    fn status(&mut self, job_id: &str) -> Result<JobStatus, SinkError>;
}

/// Runs shell command templates.
///
/// Placeholders: `{file}`, `{table}` and `{mode}` in the submit template,
/// `{job_id}` in the status template. Submit must print the job id.
#[derive(Debug, Clone)]
pub struct CommandJobClient {
    submit_template: String,
    status_template: String,
    shell: String,
}

impl CommandJobClient {
    pub fn new(submit_template: impl Into<String>, status_template: impl Into<String>) -> Self {
        Self {
            submit_template: submit_template.into(),
            status_template: status_template.into(),
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn run(&self, command: &str, table: &str) -> Result<String, SinkError> {
        debug!(command, "running job queue command");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|err| SinkError::backend(SINK, table, err))?;
        if !output.status.success() {
            return Err(SinkError::JobSubmit {
                table: table.to_string(),
                message: format!(
                    "'{command}' exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl JobQueueClient for CommandJobClient {
    fn submit(&mut self, table: &str, file: &Path, mode: WriteMode) -> Result<String, SinkError> {
        let command = self
            .submit_template
            .replace("{file}", &file.display().to_string())
            .replace("{table}", table)
            .replace("{mode}", &mode.to_string());
        let job_id = self.run(&command, table)?;
        if job_id.is_empty() {
            return Err(SinkError::JobSubmit {
                table: table.to_string(),
                message: format!("'{command}' printed no job id"),
            });
        }
        Ok(job_id)
    }

    fn status(&mut self, job_id: &str) -> Result<JobStatus, SinkError> {
        let command = self.status_template.replace("{job_id}", job_id);
        let raw = self.run(&command, job_id)?;
        let last = raw.lines().last().unwrap_or_default();
        last.parse().map_err(|message| SinkError::JobSubmit {
            table: job_id.to_string(),
            message,
        })
    }
}

/// Bounded polling with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Delay after the given failed attempt, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Accepted row counts recorded by earlier runs.
fn accepted_counts(state: &LocalFileSink) -> Result<BTreeMap<String, usize>, SinkError> {
    let Some(batch) = state.read_table(ROW_COUNT_TABLE)? else {
        return Ok(BTreeMap::new());
    };
    let (Some(tables), Some(rows)) = (batch.column("table"), batch.column("rows")) else {
        return Ok(BTreeMap::new());
    };
    Ok(tables
        .values
        .iter()
        .zip(&rows.values)
        .filter(|(table, _)| !table.is_null())
        .map(|(table, rows)| {
            let rows = rows.as_i64().and_then(|n| usize::try_from(n).ok());
            (table.canonical(), rows.unwrap_or_default())
        })
        .collect())
}

#[derive(Debug, Clone)]
struct SubmittedJob {
    id: String,
    table: String,
    rows: usize,
    file: PathBuf,
}

pub struct JobQueueSink<C: JobQueueClient> {
    client: C,
    staging: PathBuf,
    state: LocalFileSink,
    policy: PollPolicy,
    jobs: Vec<SubmittedJob>,
    accepted: BTreeMap<String, usize>,
    sequence: usize,
}

impl<C: JobQueueClient> JobQueueSink<C> {
    /// Stages files under `staging` and mirrors state tables into `state`.
    pub fn new(
        client: C,
        staging: impl Into<PathBuf>,
        state: LocalFileSink,
    ) -> Result<Self, SinkError> {
        let staging = staging.into();
        ensure_dir(&staging)?;
        Ok(Self {
            client,
            staging,
            state,
            policy: PollPolicy::default(),
            jobs: Vec::new(),
            accepted: BTreeMap::new(),
            sequence: 0,
        })
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn state(&self) -> &LocalFileSink {
        &self.state
    }

    /// Jobs submitted and not yet settled by `finalize`.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    fn stage(&mut self, table: &str, batch: &RowBatch) -> Result<PathBuf, SinkError> {
        self.sequence += 1;
        let path = self.staging.join(format!("{table}-{:05}.tsv", self.sequence));
        let file = File::create(&path).map_err(io_error(&path))?;
        write_delimited(&file, batch, b'\t', true, &path)?;
        file.sync_all().map_err(io_error(&path))?;
        Ok(path)
    }

    /// Polls one job until it settles or the attempts run out.
    fn settle(&mut self, job: &SubmittedJob) -> Result<JobStatus, String> {
        for attempt in 0..self.policy.max_attempts {
            match self.client.status(&job.id) {
                Ok(status) if status.is_settled() => return Ok(status),
                Ok(status) => {
                    debug!(job = %job.id, table = %job.table, attempt, status = %status, "job not settled");
                }
                Err(err) => {
                    warn!(job = %job.id, table = %job.table, attempt, error = %err, "job status check failed");
                }
            }
            if attempt + 1 < self.policy.max_attempts {
                std::thread::sleep(self.policy.delay(attempt));
            }
        }
        Err(format!(
            "job {} for '{}' ({}) did not settle after {} attempts",
            job.id,
            job.table,
            job.file.display(),
            self.policy.max_attempts
        ))
    }

    fn row_counts_batch(counts: &BTreeMap<String, usize>) -> Result<RowBatch, SinkError> {
        Ok(RowBatch::new(vec![
            Column::new("table", counts.keys().map(|k| Value::Text(k.clone())).collect()),
            Column::new(
                "rows",
                counts
                    .values()
                    .map(|n| Value::Int(i64::try_from(*n).unwrap_or(i64::MAX)))
                    .collect(),
            ),
        ])?)
    }
}

impl<C: JobQueueClient> Sink for JobQueueSink<C> {
    fn name(&self) -> &str {
        SINK
    }

    fn write(
        &mut self,
        table: &str,
        batch: &RowBatch,
        mode: WriteMode,
    ) -> Result<Location, SinkError> {
        if table == MASK_TABLE {
            self.state.write(table, batch, mode)?;
        }
        let file = self.stage(table, batch)?;
        let id = self.client.submit(table, &file, mode)?;
        info!(job = %id, table, mode = %mode, rows = batch.height(), "submitted load job");
        self.jobs.push(SubmittedJob {
            id: id.clone(),
            table: table.to_string(),
            rows: batch.height(),
            file,
        });
        Ok(Location::new(format!("job://{id}"), batch.height()))
    }

    fn finalize(&mut self) -> Result<SinkReport, SinkError> {
        let mut report = SinkReport::default();
        let jobs = std::mem::take(&mut self.jobs);
        for job in &jobs {
            let accepted = match self.settle(job) {
                Ok(JobStatus::Done { rejected }) => {
                    if rejected > 0 {
                        report = report.with_warning(format!(
                            "job {} for '{}' rejected {rejected} of {} rows",
                            job.id, job.table, job.rows
                        ));
                    }
                    job.rows.saturating_sub(rejected)
                }
                Ok(JobStatus::Failed(message)) => {
                    report = report.with_warning(format!(
                        "job {} for '{}' failed: {message}",
                        job.id, job.table
                    ));
                    0
                }
                Ok(other) => {
                    report = report.with_warning(format!(
                        "job {} for '{}' ended in unexpected state {other}",
                        job.id, job.table
                    ));
                    0
                }
                Err(timeout) => {
                    report = report.with_warning(timeout);
                    0
                }
            };
            if job.table != MASK_TABLE {
                *self.accepted.entry(job.table.clone()).or_default() += accepted;
            }
            *report.rows.entry(job.table.clone()).or_default() += accepted;
        }
        if !self.accepted.is_empty() {
            let mut totals = accepted_counts(&self.state)?;
            for (table, rows) in std::mem::take(&mut self.accepted) {
                *totals.entry(table).or_default() += rows;
            }
            let batch = Self::row_counts_batch(&totals)?;
            self.state.write(ROW_COUNT_TABLE, &batch, WriteMode::Create)?;
        }
        info!(jobs = jobs.len(), warnings = report.warnings.len(), "load jobs settled");
        Ok(report)
    }

    fn load_existing_identifier_map(&mut self) -> Result<Option<BTreeMap<String, i64>>, SinkError> {
        self.state.load_existing_identifier_map()
    }

    fn load_existing_row_counts(&mut self) -> Result<Option<BTreeMap<String, usize>>, SinkError> {
        let counts = accepted_counts(&self.state)?;
        Ok((!counts.is_empty()).then_some(counts))
    }

    fn persist_run_log(&mut self, log: &RunLog) -> Result<Location, SinkError> {
        self.state.persist_run_log(log)
    }
}
