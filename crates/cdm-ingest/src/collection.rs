//! Coordinated cursors over every source of a run.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use cdm_model::{CdmError, RowBatch, TABLE_NAME_LIMIT, TableSet, resolve_name};

use crate::error::{IngestError, Result};
use crate::source::ChunkedSource;

/// Result of advancing a group of cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// At least one cursor holds a fresh, non-empty slice.
    Advanced,
    /// Every cursor in the group has run dry.
    Exhausted,
}

/// One source plus the slice it most recently produced.
pub struct ChunkCursor {
    source: Box<dyn ChunkedSource>,
    current: RowBatch,
    initialized: bool,
    exhausted: bool,
    chunks: usize,
}

impl std::fmt::Debug for ChunkCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCursor")
            .field("source", &self.source.name())
            .field("current", &self.current)
            .field("initialized", &self.initialized)
            .field("exhausted", &self.exhausted)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl ChunkCursor {
    pub fn new(source: Box<dyn ChunkedSource>) -> Self {
        Self {
            source,
            current: RowBatch::empty(),
            initialized: false,
            exhausted: false,
            chunks: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn current(&self) -> &RowBatch {
        &self.current
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    fn fetch(&mut self, size: usize) -> Result<()> {
        let batch = self.source.fetch_next(size)?;
        if batch.is_empty() {
            self.exhausted = true;
        } else {
            self.chunks += 1;
        }
        self.current = batch;
        Ok(())
    }

    fn initialize(&mut self, size: usize) -> Result<()> {
        self.initialized = true;
        self.fetch(size)
    }

    fn advance(&mut self, size: usize) -> Result<()> {
        if !self.initialized {
            return Err(IngestError::NotInitialized {
                name: self.source.name().to_string(),
            });
        }
        if !self.exhausted {
            self.fetch(size)?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.source.reset()?;
        self.current = RowBatch::empty();
        self.initialized = false;
        self.exhausted = false;
        self.chunks = 0;
        Ok(())
    }
}

/// All sources of a run keyed by name.
#[derive(Debug, Default)]
pub struct SourceCollection {
    cursors: BTreeMap<String, ChunkCursor>,
}

impl SourceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: Box<dyn ChunkedSource>) -> Result<()> {
        let name = source.name().to_string();
        if self.cursors.contains_key(&name) {
            return Err(IngestError::DuplicateSource { name });
        }
        self.cursors.insert(name, ChunkCursor::new(source));
        Ok(())
    }

    pub fn with_source(mut self, source: impl ChunkedSource + 'static) -> Result<Self> {
        self.add(Box::new(source))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.cursors.keys().map(String::as_str).collect()
    }

    pub fn cursor(&self, name: &str) -> Option<&ChunkCursor> {
        self.cursors.get(name)
    }

    /// Maps rule source names onto source names, using the same fallbacks
    /// as the rule resolver. Fails listing every name that has no source.
    pub fn check_inputs<'a, I>(&self, requested: I) -> std::result::Result<Vec<String>, CdmError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for name in requested {
            match resolve_name(name, self.names(), TABLE_NAME_LIMIT) {
                Some((found, _)) => resolved.push(found.to_string()),
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(CdmError::MissingInputFiles { missing });
        }
        resolved.sort();
        resolved.dedup();
        Ok(resolved)
    }

    fn cursor_mut(&mut self, name: &str) -> Result<&mut ChunkCursor> {
        self.cursors
            .get_mut(name)
            .ok_or_else(|| IngestError::UnknownSource {
                name: name.to_string(),
            })
    }

    /// Fetches the first slice of each named source.
    pub fn initialize<S: AsRef<str>>(&mut self, names: &[S], size: usize) -> Result<Advance> {
        for name in names {
            self.cursor_mut(name.as_ref())?.initialize(size)?;
        }
        debug!(sources = names.len(), "initialized source cursors");
        self.status(names)
    }

    /// Fetches the next slice for every named, initialized, non-exhausted source.
    pub fn advance<S: AsRef<str>>(&mut self, names: &[S], size: usize) -> Result<Advance> {
        for name in names {
            let cursor = self.cursor_mut(name.as_ref())?;
            cursor.advance(size)?;
            trace!(
                source = name.as_ref(),
                chunks = cursor.chunks(),
                exhausted = cursor.is_exhausted(),
                "advanced cursor"
            );
        }
        self.status(names)
    }

    /// Advances every initialized source.
    pub fn advance_all(&mut self, size: usize) -> Result<Advance> {
        let names: Vec<String> = self
            .cursors
            .iter()
            .filter(|(_, c)| c.is_initialized())
            .map(|(n, _)| n.clone())
            .collect();
        self.advance(&names, size)
    }

    /// Rewinds the named sources so they can be read again from the start.
    pub fn reset<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            self.cursor_mut(name.as_ref())?.reset()?;
        }
        Ok(())
    }

    pub fn reset_all(&mut self) -> Result<()> {
        for cursor in self.cursors.values_mut() {
            cursor.reset()?;
        }
        Ok(())
    }

    fn status<S: AsRef<str>>(&self, names: &[S]) -> Result<Advance> {
        let mut all_exhausted = true;
        for name in names {
            let cursor = self
                .cursors
                .get(name.as_ref())
                .ok_or_else(|| IngestError::UnknownSource {
                    name: name.as_ref().to_string(),
                })?;
            all_exhausted &= cursor.is_exhausted();
        }
        Ok(if all_exhausted {
            Advance::Exhausted
        } else {
            Advance::Advanced
        })
    }
}

impl TableSet for SourceCollection {
    fn table_names(&self) -> Vec<&str> {
        self.names()
    }

    fn table(&self, name: &str) -> Option<&RowBatch> {
        self.cursors.get(name).map(ChunkCursor::current)
    }
}
