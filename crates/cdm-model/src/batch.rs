//! Columnar row batches passed between sources, target instances and sinks.

use std::collections::BTreeMap;

use polars::prelude::{BooleanChunked, DataFrame, NewChunkedArray};

use crate::error::{CdmError, Result};
use crate::frame::{self, ColumnKind};
use crate::lookup::CaseInsensitiveSet;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn nulls(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, vec![Value::Null; len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub fn is_all_null(&self) -> bool {
        self.values.iter().all(Value::is_null)
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// An ordered set of equal-length columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowBatch {
    columns: Vec<Column>,
    height: usize,
}

impl RowBatch {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let height = columns.first().map_or(0, Column::len);
        for column in &columns {
            if column.len() != height {
                return Err(CdmError::RowCountMismatch {
                    context: format!("column '{}'", column.name),
                    expected: height,
                    found: column.len(),
                });
            }
        }
        Ok(Self { columns, height })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Empty batch with the given column names.
    pub fn with_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names.into_iter().map(|n| Column::nulls(n, 0)).collect();
        Self { columns, height: 0 }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_ci(&self, name: &str) -> Option<&Column> {
        let names = CaseInsensitiveSet::new(self.columns.iter().map(|c| c.name.as_str()));
        names.get(name).and_then(|actual| self.column(actual))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Replaces the named column in place, keeping its position.
    pub fn replace_column(&mut self, column: Column) -> Result<()> {
        if column.len() != self.height {
            return Err(CdmError::RowCountMismatch {
                context: format!("replacement column '{}'", column.name),
                expected: self.height,
                found: column.len(),
            });
        }
        match self.column_index(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Encodes the batch as a Polars frame.
    pub fn to_frame(&self) -> Result<DataFrame> {
        frame::encode(self, None)
    }

    /// Copies a Polars frame into a batch.
    pub fn from_frame(df: &DataFrame) -> Result<RowBatch> {
        frame::decode(df)
    }

    /// Keeps the rows where `keep` is true.
    pub fn filter(&self, keep: &[bool]) -> Result<RowBatch> {
        if keep.len() != self.height {
            return Err(CdmError::RowCountMismatch {
                context: "row filter".to_string(),
                expected: self.height,
                found: keep.len(),
            });
        }
        if keep.iter().all(|k| *k) {
            return Ok(self.clone());
        }
        let mask = BooleanChunked::from_slice("keep".into(), keep);
        let filtered = self.to_frame()?.filter(&mask)?;
        RowBatch::from_frame(&filtered)
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<RowBatch> {
        let start = offset.min(self.height);
        let len = len.min(self.height - start);
        let offset = i64::try_from(start).map_err(|_| {
            CdmError::Frame(format!("slice offset {start} out of range"))
        })?;
        RowBatch::from_frame(&self.to_frame()?.slice(offset, len))
    }

    /// Reorders columns to `order`; missing names become all-null columns.
    pub fn select<S: AsRef<str>>(&self, order: &[S]) -> Result<RowBatch> {
        let mut df = self.to_frame()?;
        for name in order {
            let name = name.as_ref();
            if self.column(name).is_none() {
                let nulls = frame::column_to_series(
                    &Column::nulls(name, self.height),
                    frame::ColumnKind::Null,
                )?;
                df.with_column(nulls)?;
            }
        }
        let names: Vec<&str> = order.iter().map(|name| name.as_ref()).collect();
        let selected = df.select(names)?;
        RowBatch::from_frame(&selected)
    }

    /// Stacks batches with identical column order.
    pub fn concat(batches: Vec<RowBatch>) -> Result<RowBatch> {
        let mut iter = batches.iter();
        let Some(first) = iter.next() else {
            return Ok(RowBatch::empty());
        };
        let mut kinds: Vec<ColumnKind> = first.columns.iter().map(ColumnKind::of_column).collect();
        for batch in iter {
            if batch.column_names() != first.column_names() {
                return Err(CdmError::BadInputs(format!(
                    "cannot stack batches with columns [{}] and [{}]",
                    first.column_names().join(", "),
                    batch.column_names().join(", ")
                )));
            }
            for (kind, column) in kinds.iter_mut().zip(&batch.columns) {
                *kind = kind.unify(ColumnKind::of_column(column));
            }
        }
        if batches.len() == 1 {
            return Ok(first.clone());
        }
        let mut stacked = frame::encode(first, Some(&kinds))?;
        for batch in &batches[1..] {
            stacked.vstack_mut(&frame::encode(batch, Some(&kinds))?)?;
        }
        RowBatch::from_frame(&stacked)
    }

    pub fn row(&self, idx: usize) -> Vec<&Value> {
        self.columns.iter().map(|c| &c.values[idx]).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.height).map(|idx| self.row(idx))
    }
}

/// Named source tables visible to the rule resolver for the current chunk.
pub trait TableSet {
    fn table_names(&self) -> Vec<&str>;
    fn table(&self, name: &str) -> Option<&RowBatch>;
}

impl TableSet for BTreeMap<String, RowBatch> {
    fn table_names(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }

    fn table(&self, name: &str) -> Option<&RowBatch> {
        self.get(name)
    }
}
