use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, info_span};

use cdm_cli::inputs::{collect_sources, load_file_tables, load_sqlite_tables};
use cdm_cli::settings::{RunOverrides, parse_delimiter, resolve_run_config};
use cdm_core::{
    Analysis, AnalysisOutcome, Orchestrator, RowCountAnalysis, RunSummary, Sink,
    ValueFrequencyAnalysis, run_analyses,
};
use cdm_ingest::SourceCollection;
use cdm_map::{delta, filter_tables, load_rules, save_rules, validate_rules};
use cdm_model::{RuleDocument, RunConfig};
use cdm_output::{CommandJobClient, JobQueueSink, LocalFileSink, PollPolicy, SqliteSink};
use cdm_standards::{SchemaRegistry, SchemaVersion, standards_root};

use crate::cli::{AnalyseArgs, DeltaArgs, RunArgs, SinkArgs, SinkKindArg, StandardsArgs, TablesArgs};
use crate::summary::{print_analyses, print_delta, print_fields, print_tables};

fn load_registry(args: &StandardsArgs) -> Result<SchemaRegistry> {
    let dir = args.standards_dir.clone().unwrap_or_else(standards_root);
    if args.verify {
        let (registry, summary) = SchemaRegistry::verify_and_load(&dir)
            .with_context(|| format!("verify standards in {}", dir.display()))?;
        info!(
            files = summary.file_count,
            versions = summary.version_count,
            tables = summary.table_count,
            "standards verified"
        );
        return Ok(registry);
    }
    SchemaRegistry::load(&dir).with_context(|| format!("load standards from {}", dir.display()))
}

fn select_version<'a>(
    registry: &'a SchemaRegistry,
    version: Option<&str>,
) -> Result<&'a SchemaVersion> {
    let schema = match version {
        Some(name) => registry.version(name)?,
        None => registry.default_version()?,
    };
    Ok(schema)
}

pub fn run_mapping(args: &RunArgs) -> Result<RunSummary> {
    let overrides = RunOverrides {
        cdm_version: args.cdm_version.clone(),
        chunk_size: args.chunk_size,
        start_index: args.start_index,
        format_policy: args.format_policy.map(Into::into),
        check_sample_size: args.check_sample_size,
        check_tolerance: args.check_tolerance,
        resume: args.resume,
        log_data: args.log_data,
    };
    let config = resolve_run_config(args.config.as_deref(), &overrides)?;
    let registry = load_registry(&args.standards)?;
    let schema = registry
        .version(&config.cdm_version)
        .context("select schema version")?;

    let mut rules =
        load_rules(&args.rules).with_context(|| format!("load rules {}", args.rules.display()))?;
    if !args.tables.is_empty() {
        rules = filter_tables(&rules, &args.tables);
        if rules.cdm.is_empty() {
            bail!("none of the requested tables have rules: {}", args.tables.join(", "));
        }
    }
    validate_rules(&rules).context("validate rules")?;

    let sources = collect_sources(
        args.sources.as_deref(),
        args.source_db.as_deref(),
        &args.queries,
    )?;

    let span = info_span!("cli_run", rules = %args.rules.display());
    let _guard = span.enter();
    let sink_args = &args.sink;
    match sink_args.kind {
        SinkKindArg::File => {
            let sink = LocalFileSink::new(&sink_args.output_dir)
                .context("open output directory")?
                .with_delimiter(parse_delimiter(&sink_args.delimiter)?);
            execute(config, schema, rules, sources, sink)
        }
        SinkKindArg::Sqlite => {
            let Some(db) = &sink_args.db else {
                bail!("--sink sqlite needs --db");
            };
            let sink = SqliteSink::open(db)
                .with_context(|| format!("open database {}", db.display()))?
                .with_definitions(schema.tables());
            execute(config, schema, rules, sources, sink)
        }
        SinkKindArg::JobQueue => {
            let sink = job_queue_sink(sink_args)?;
            execute(config, schema, rules, sources, sink)
        }
    }
}

fn job_queue_sink(args: &SinkArgs) -> Result<JobQueueSink<CommandJobClient>> {
    let (Some(submit), Some(status)) = (&args.submit_cmd, &args.status_cmd) else {
        bail!("--sink job-queue needs --submit-cmd and --status-cmd");
    };
    let mut policy = PollPolicy::default();
    if let Some(attempts) = args.poll_attempts {
        policy.max_attempts = attempts;
    }
    if let Some(delay) = args.poll_delay {
        policy.initial_delay = Duration::from_secs(delay);
    }
    let state = LocalFileSink::new(args.output_dir.join("state")).context("open state directory")?;
    let sink = JobQueueSink::new(
        CommandJobClient::new(submit, status),
        args.output_dir.join("staging"),
        state,
    )
    .context("open staging directory")?
    .with_policy(policy);
    Ok(sink)
}

fn execute<S: Sink>(
    config: RunConfig,
    schema: &SchemaVersion,
    rules: RuleDocument,
    sources: SourceCollection,
    sink: S,
) -> Result<RunSummary> {
    let mut orchestrator = Orchestrator::new(config, schema, rules, sources, sink);
    let summary = orchestrator.run().context("mapping run failed")?;
    Ok(summary)
}

pub fn run_tables(args: &TablesArgs) -> Result<()> {
    let registry = load_registry(&args.standards)?;
    let schema = select_version(&registry, args.cdm_version.as_deref())?;
    match &args.table {
        Some(name) => print_fields(schema.table(name)?),
        None => print_tables(schema),
    }
    Ok(())
}

pub fn run_delta(args: &DeltaArgs) -> Result<()> {
    let current = load_rules(&args.current)
        .with_context(|| format!("load rules {}", args.current.display()))?;
    let previous = load_rules(&args.previous)
        .with_context(|| format!("load rules {}", args.previous.display()))?;
    let changed = delta(&current, &previous);
    save_rules(&args.out, &changed)
        .with_context(|| format!("write delta {}", args.out.display()))?;
    print_delta(&changed, &args.out);
    Ok(())
}

pub fn run_analyse(args: &AnalyseArgs) -> Result<Vec<AnalysisOutcome>> {
    let tables = match (&args.output_dir, &args.db) {
        (_, Some(db)) => load_sqlite_tables(db)?,
        (Some(dir), None) => load_file_tables(dir, parse_delimiter(&args.delimiter)?)?,
        (None, None) => load_file_tables(Path::new("output"), parse_delimiter(&args.delimiter)?)?,
    };
    if tables.is_empty() {
        bail!("no mapped tables found");
    }

    let mut analyses: Vec<Box<dyn Analysis>> = vec![Box::new(RowCountAnalysis)];
    for target in &args.frequencies {
        analyses.push(Box::new(
            ValueFrequencyAnalysis::new(&target.table, &target.field).with_limit(args.limit),
        ));
    }
    let outcomes = run_analyses(&tables, &analyses, args.workers);
    print_analyses(&outcomes);
    Ok(outcomes)
}
