//! Mapping engine core.
//!
//! - **instance**: one rule set bound to one target table, built per chunk
//! - **strategy**: per-table key synthesis and auto-fill
//! - **masker** / **dedup**: identifier pseudonymization and row dedup
//! - **orchestrator**: the chunk loop that drives everything into a [`Sink`]
//! - **analysis**: post-run analyses on a worker pool

pub mod analysis;
pub mod builder;
pub mod dedup;
pub mod error;
pub mod instance;
pub mod masker;
pub mod orchestrator;
pub mod sink;
pub mod strategy;

pub use analysis::{
    Analysis, AnalysisOutcome, AnalysisResult, RowCountAnalysis, ValueFrequencyAnalysis,
    run_analyses,
};
pub use builder::{TableBuilder, TablePlan, plan_tables};
pub use dedup::{DedupOutcome, Deduplicator, dedup_batch, row_hash};
pub use error::{RunError, SinkError};
pub use instance::{BuildOptions, BuildStage, InstanceMetadata, TargetTableInstance};
pub use masker::{
    IdentifierMasker, MASK_TABLE, MaskedBatch, SOURCE_SUBJECT, TARGET_SUBJECT,
    identifier_map_from_batch, mask_dependent, mask_entries_batch,
};
pub use orchestrator::{Orchestrator, RunSummary, TableSummary};
pub use sink::{Location, MemorySink, Sink, SinkReport, WriteMode};
pub use strategy::{AutoFill, Derivation, TableStrategy};
