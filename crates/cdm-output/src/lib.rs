//! Sink implementations for mapping runs.
//!
//! - **LocalFileSink**: one delimited file per table plus `logs/<timestamp>.json`
//! - **SqliteSink**: replace/append tables in one database with key continuity checks
//! - **JobQueueSink**: staged files submitted to an external load queue

mod common;
mod delimited;
mod job_queue;
mod sqlite;

pub use common::RUN_LOG_DIR;
pub use delimited::LocalFileSink;
pub use job_queue::{
    CommandJobClient, JobQueueClient, JobQueueSink, JobStatus, PollPolicy, ROW_COUNT_TABLE,
};
pub use sqlite::{RUN_LOG_TABLE, SqliteSink};
