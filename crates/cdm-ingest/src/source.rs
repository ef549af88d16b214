use cdm_model::RowBatch;

use crate::error::Result;

/// A table that can be read in bounded slices.
///
/// `fetch_next` returns at most `size_hint` rows; an empty batch means the
/// source is exhausted. Empty batches keep the column names so rules can
/// still resolve against them.
pub trait ChunkedSource {
    fn name(&self) -> &str;

    fn fetch_next(&mut self, size_hint: usize) -> Result<RowBatch>;

    /// Rewinds to the first row.
    fn reset(&mut self) -> Result<()>;

    /// Column names, reading the header when necessary.
    fn columns(&mut self) -> Result<Vec<String>>;
}
