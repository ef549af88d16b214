//! Polars frames behind the row operations of [`RowBatch`].
//!
//! Each column is encoded with one Polars dtype picked from its values.
//! Columns whose non-null values mix kinds are held as their canonical text.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::{
    AnyValue, DataFrame, DataType, NamedFrom, PolarsError, Series, TimeUnit,
};

use crate::batch::{Column, RowBatch};
use crate::error::{CdmError, Result};
use crate::value::Value;

impl From<PolarsError> for CdmError {
    fn from(err: PolarsError) -> Self {
        CdmError::Frame(err.to_string())
    }
}

/// Storage kind of one column in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Null,
    Int,
    Float,
    Date,
    Timestamp,
    Text,
}

impl ColumnKind {
    fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Int(_) => ColumnKind::Int,
            Value::Float(_) => ColumnKind::Float,
            Value::Date(_) => ColumnKind::Date,
            Value::Timestamp(_) => ColumnKind::Timestamp,
            Value::Text(_) => ColumnKind::Text,
        }
    }

    pub(crate) fn unify(self, other: Self) -> Self {
        match (self, other) {
            (ColumnKind::Null, kind) | (kind, ColumnKind::Null) => kind,
            (a, b) if a == b => a,
            _ => ColumnKind::Text,
        }
    }

    pub(crate) fn of_column(column: &Column) -> Self {
        column
            .values
            .iter()
            .map(Self::of_value)
            .fold(ColumnKind::Null, Self::unify)
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn date_to_days(date: &NaiveDate) -> i32 {
    date.signed_duration_since(epoch())
        .num_days()
        .try_into()
        .unwrap_or(i32::MAX)
}

fn days_to_date(days: i32) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::Duration::days(i64::from(days)))
}

fn timestamp_from(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let utc = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    utc.map(|dt| dt.naive_utc())
}

/// Encodes one column as a Polars series of `kind`.
pub(crate) fn column_to_series(column: &Column, kind: ColumnKind) -> Result<Series> {
    let name = column.name.as_str().into();
    let values = &column.values;
    let series = match kind {
        ColumnKind::Int => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<Option<i64>>>(),
        ),
        ColumnKind::Float => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Float(f) => Some(*f),
                    _ => None,
                })
                .collect::<Vec<Option<f64>>>(),
        ),
        ColumnKind::Date => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Date(d) => Some(date_to_days(d)),
                    _ => None,
                })
                .collect::<Vec<Option<i32>>>(),
        )
        .cast(&DataType::Date)?,
        ColumnKind::Timestamp => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                    _ => None,
                })
                .collect::<Vec<Option<i64>>>(),
        )
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
        ColumnKind::Null | ColumnKind::Text => Series::new(
            name,
            values
                .iter()
                .map(|v| (!v.is_null()).then(|| v.canonical()))
                .collect::<Vec<Option<String>>>(),
        ),
    };
    Ok(series)
}

/// Converts a Polars `AnyValue` into a batch value.
pub fn any_to_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Int8(v) => Value::Int(i64::from(v)),
        AnyValue::Int16(v) => Value::Int(i64::from(v)),
        AnyValue::Int32(v) => Value::Int(i64::from(v)),
        AnyValue::Int64(v) => Value::Int(v),
        AnyValue::UInt8(v) => Value::Int(i64::from(v)),
        AnyValue::UInt16(v) => Value::Int(i64::from(v)),
        AnyValue::UInt32(v) => Value::Int(i64::from(v)),
        AnyValue::UInt64(v) => i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Int),
        AnyValue::Float32(v) => Value::Float(f64::from(v)),
        AnyValue::Float64(v) => Value::Float(v),
        AnyValue::Boolean(b) => Value::Int(i64::from(b)),
        AnyValue::Date(days) => days_to_date(days).map_or(Value::Null, Value::Date),
        AnyValue::Datetime(v, unit, _) | AnyValue::DatetimeOwned(v, unit, _) => {
            timestamp_from(v, unit).map_or(Value::Null, Value::Timestamp)
        }
        AnyValue::String(s) => Value::text(s),
        AnyValue::StringOwned(s) => Value::text(s.to_string()),
        other => Value::text(other.to_string()),
    }
}

/// Encodes a batch as a frame, using `kinds` per column when given.
pub(crate) fn encode(batch: &RowBatch, kinds: Option<&[ColumnKind]>) -> Result<DataFrame> {
    let columns = batch
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let kind = kinds
                .and_then(|k| k.get(idx).copied())
                .unwrap_or_else(|| ColumnKind::of_column(column));
            column_to_series(column, kind).map(Into::into)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Copies every cell of `df` into a row batch.
pub(crate) fn decode(df: &DataFrame) -> Result<RowBatch> {
    let height = df.height();
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let mut values = Vec::with_capacity(height);
        for idx in 0..height {
            values.push(any_to_value(column.get(idx)?));
        }
        columns.push(Column::new(column.name().to_string(), values));
    }
    RowBatch::new(columns)
}
