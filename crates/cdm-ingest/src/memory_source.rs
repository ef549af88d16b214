use polars::prelude::DataFrame;

use cdm_model::RowBatch;

use crate::error::Result;
use crate::source::ChunkedSource;

/// A table already held in memory, served in slices.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    batch: RowBatch,
    offset: usize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, batch: RowBatch) -> Self {
        Self {
            name: name.into(),
            batch,
            offset: 0,
        }
    }

    pub fn from_dataframe(name: impl Into<String>, df: &DataFrame) -> Result<Self> {
        Ok(Self::new(name, RowBatch::from_frame(df)?))
    }
}

impl ChunkedSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_next(&mut self, size_hint: usize) -> Result<RowBatch> {
        let slice = self.batch.slice(self.offset, size_hint)?;
        self.offset += slice.height();
        Ok(slice)
    }

    fn reset(&mut self) -> Result<()> {
        self.offset = 0;
        Ok(())
    }

    fn columns(&mut self) -> Result<Vec<String>> {
        Ok(self
            .batch
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}
