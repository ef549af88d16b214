//! CLI argument definitions for the `cdm` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

use cdm_cli::settings::{FieldRef, QuerySpec};
use cdm_model::FormatPolicy;

#[derive(Parser)]
#[command(
    name = "cdm",
    version,
    about = "Map tabular source data into the OMOP Common Data Model",
    long_about = "Map tabular source data into the OMOP Common Data Model.\n\n\
                  Rules are read from a JSON rule document. Sources are CSV/TSV files\n\
                  or SQLite queries. Output goes to delimited files, a SQLite database\n\
                  or an external load queue."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format.
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Map sources into CDM tables.
    Run(RunArgs),

    /// List the tables (or one table's fields) of a schema version.
    Tables(TablesArgs),

    /// Write the rule sets that changed between two rule documents.
    Delta(DeltaArgs),

    /// Run analyses over previously written CDM tables.
    Analyse(AnalyseArgs),
}

#[derive(Args)]
pub struct StandardsArgs {
    /// Standards directory (default: $CDM_STANDARDS_DIR or the bundled one).
    #[arg(long = "standards-dir", value_name = "DIR")]
    pub standards_dir: Option<PathBuf>,

    /// Check every standards file against the manifest checksums.
    #[arg(long = "verify-standards")]
    pub verify: bool,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Rule document (JSON).
    #[arg(long = "rules", value_name = "FILE")]
    pub rules: PathBuf,

    /// Folder of CSV/TSV source files.
    #[arg(long = "sources", value_name = "DIR")]
    pub sources: Option<PathBuf>,

    /// SQLite database queried by --query sources.
    #[arg(long = "source-db", value_name = "FILE")]
    pub source_db: Option<PathBuf>,

    /// Named query source, NAME=SQL. Repeatable.
    #[arg(long = "query", value_name = "NAME=SQL")]
    pub queries: Vec<QuerySpec>,

    /// Run configuration (TOML). Flags below override it.
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Only map these target tables. Repeatable.
    #[arg(long = "table", value_name = "TABLE")]
    pub tables: Vec<String>,

    /// CDM schema version.
    #[arg(long = "cdm-version", value_name = "VERSION")]
    pub cdm_version: Option<String>,

    /// Rows per chunk (default: whole sources).
    #[arg(long = "chunk-size", value_name = "ROWS")]
    pub chunk_size: Option<usize>,

    /// First value for synthesized keys and masked identifiers.
    #[arg(long = "start-index", value_name = "N")]
    pub start_index: Option<i64>,

    /// Formatter behavior after each table is built.
    #[arg(long = "format", value_enum)]
    pub format_policy: Option<FormatPolicyArg>,

    /// Rows sampled per column in check mode.
    #[arg(long = "check-sample", value_name = "ROWS")]
    pub check_sample_size: Option<usize>,

    /// Tolerated failure fraction in check mode (0..=1).
    #[arg(long = "check-tolerance", value_name = "FRACTION")]
    pub check_tolerance: Option<f64>,

    /// Continue numbering and masking from state persisted by the sink.
    #[arg(long = "resume")]
    pub resume: bool,

    /// Allow row values in log output.
    ///
    /// Duplicate-row samples are redacted unless this is set.
    #[arg(long = "log-data")]
    pub log_data: bool,

    #[command(flatten)]
    pub standards: StandardsArgs,

    #[command(flatten)]
    pub sink: SinkArgs,
}

#[derive(Args)]
pub struct SinkArgs {
    /// Where mapped tables go.
    #[arg(long = "sink", value_enum, default_value = "file")]
    pub kind: SinkKindArg,

    /// Output directory (file sink; state and staging for the job queue).
    #[arg(long = "output-dir", value_name = "DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Field delimiter for delimited output: a character or `tab`.
    #[arg(long = "delimiter", default_value = "tab")]
    pub delimiter: String,

    /// Database file (sqlite sink).
    #[arg(long = "db", value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Submit command template with {file}, {table} and {mode}.
    #[arg(long = "submit-cmd", value_name = "TEMPLATE")]
    pub submit_cmd: Option<String>,

    /// Status command template with {job_id}.
    #[arg(long = "status-cmd", value_name = "TEMPLATE")]
    pub status_cmd: Option<String>,

    /// Status checks per job before giving up.
    #[arg(long = "poll-attempts", value_name = "N")]
    pub poll_attempts: Option<u32>,

    /// Delay before the first status re-check, in seconds.
    #[arg(long = "poll-delay", value_name = "SECS")]
    pub poll_delay: Option<u64>,
}

#[derive(Parser)]
pub struct TablesArgs {
    /// Schema version (default: the manifest default).
    #[arg(long = "cdm-version", value_name = "VERSION")]
    pub cdm_version: Option<String>,

    /// Show the fields of this table instead.
    #[arg(value_name = "TABLE")]
    pub table: Option<String>,

    #[command(flatten)]
    pub standards: StandardsArgs,
}

#[derive(Parser)]
pub struct DeltaArgs {
    /// The newer rule document.
    #[arg(value_name = "CURRENT")]
    pub current: PathBuf,

    /// The rule document already processed.
    #[arg(value_name = "PREVIOUS")]
    pub previous: PathBuf,

    /// Where to write the delta document.
    #[arg(long = "out", value_name = "FILE")]
    pub out: PathBuf,
}

#[derive(Parser)]
pub struct AnalyseArgs {
    /// Output directory written by the file sink.
    #[arg(long = "output-dir", value_name = "DIR", conflicts_with = "db")]
    pub output_dir: Option<PathBuf>,

    /// Database written by the sqlite sink.
    #[arg(long = "db", value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Field delimiter of the output files.
    #[arg(long = "delimiter", default_value = "tab")]
    pub delimiter: String,

    /// Value frequencies of TABLE.FIELD. Repeatable.
    #[arg(long = "frequency", value_name = "TABLE.FIELD")]
    pub frequencies: Vec<FieldRef>,

    /// Most frequent values to show per field.
    #[arg(long = "limit", default_value_t = 10)]
    pub limit: usize,

    /// Worker threads.
    #[arg(long = "workers", default_value_t = 4)]
    pub workers: usize,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SinkKindArg {
    File,
    Sqlite,
    JobQueue,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatPolicyArg {
    Off,
    On,
    Check,
}

impl From<FormatPolicyArg> for FormatPolicy {
    fn from(arg: FormatPolicyArg) -> Self {
        match arg {
            FormatPolicyArg::Off => FormatPolicy::Off,
            FormatPolicyArg::On => FormatPolicy::On,
            FormatPolicyArg::Check => FormatPolicy::Check,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
