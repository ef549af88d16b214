//! Chunked sources for CDM mapping runs.
//!
//! Every source implements [`ChunkedSource`] and is driven through a
//! [`SourceCollection`], which keeps one cursor per source and exposes the
//! current slices as a [`cdm_model::TableSet`].

pub mod collection;
pub mod csv_source;
pub mod discovery;
pub mod error;
pub mod memory_source;
pub mod source;
pub mod sql_source;

pub use collection::{Advance, ChunkCursor, SourceCollection};
pub use csv_source::{CsvFileSource, normalize_header};
pub use discovery::{discover_sources, list_delimited_files};
pub use error::{IngestError, Result};
pub use memory_source::MemorySource;
pub use source::ChunkedSource;
pub use sql_source::{SqlQuerySource, value_from_sql};
