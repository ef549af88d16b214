//! Named column operations applied by mapping rules.

use std::str::FromStr;

use chrono::Datelike;

use cdm_model::{CdmError, Column, Value};

use crate::datetime::{value_to_date, value_to_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOperation {
    ExtractYear,
    ExtractMonth,
    ExtractDay,
    GetDatetime,
    DateFromTimestamp,
    /// Broadcasts the first non-null value to every row.
    MarkScalar,
    ToUpper,
    ToLower,
    Strip,
}

impl ColumnOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnOperation::ExtractYear => "extract_year",
            ColumnOperation::ExtractMonth => "extract_month",
            ColumnOperation::ExtractDay => "extract_day",
            ColumnOperation::GetDatetime => "get_datetime",
            ColumnOperation::DateFromTimestamp => "extract_date_from_timestamp",
            ColumnOperation::MarkScalar => "mark_scalar",
            ColumnOperation::ToUpper => "to_upper",
            ColumnOperation::ToLower => "to_lower",
            ColumnOperation::Strip => "strip",
        }
    }

    /// Applies the operation to a copy of `column`.
    pub fn apply(&self, column: &Column) -> Column {
        let values = match self {
            ColumnOperation::ExtractYear => map_dates(column, |d| i64::from(d.year())),
            ColumnOperation::ExtractMonth => map_dates(column, |d| i64::from(d.month())),
            ColumnOperation::ExtractDay => map_dates(column, |d| i64::from(d.day())),
            ColumnOperation::GetDatetime => column
                .values
                .iter()
                .map(|v| value_to_timestamp(v).map_or(Value::Null, Value::Timestamp))
                .collect(),
            ColumnOperation::DateFromTimestamp => column
                .values
                .iter()
                .map(|v| value_to_date(v).map_or(Value::Null, Value::Date))
                .collect(),
            ColumnOperation::MarkScalar => {
                let scalar = column
                    .values
                    .iter()
                    .find(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_default();
                vec![scalar; column.len()]
            }
            ColumnOperation::ToUpper => map_text(column, str::to_uppercase),
            ColumnOperation::ToLower => map_text(column, str::to_lowercase),
            ColumnOperation::Strip => map_text(column, |s| s.trim().to_string()),
        };
        Column::new(column.name.clone(), values)
    }
}

impl FromStr for ColumnOperation {
    type Err = CdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let op = match normalized.as_str() {
            "extract_year" => ColumnOperation::ExtractYear,
            "extract_month" => ColumnOperation::ExtractMonth,
            "extract_day" => ColumnOperation::ExtractDay,
            "get_datetime" | "to_datetime" => ColumnOperation::GetDatetime,
            "extract_date_from_timestamp" | "get_date_from_datetime" => {
                ColumnOperation::DateFromTimestamp
            }
            "mark_scalar" => ColumnOperation::MarkScalar,
            "to_upper" | "upper" => ColumnOperation::ToUpper,
            "to_lower" | "lower" => ColumnOperation::ToLower,
            "strip" | "trim" => ColumnOperation::Strip,
            _ => return Err(CdmError::UnknownOperation(s.to_string())),
        };
        Ok(op)
    }
}

fn map_dates(column: &Column, part: impl Fn(chrono::NaiveDate) -> i64) -> Vec<Value> {
    column
        .values
        .iter()
        .map(|v| value_to_date(v).map_or(Value::Null, |d| Value::Int(part(d))))
        .collect()
}

fn map_text(column: &Column, f: impl Fn(&str) -> String) -> Vec<Value> {
    column
        .values
        .iter()
        .map(|v| match v {
            Value::Text(s) => Value::text(f(s.as_str())),
            other => other.clone(),
        })
        .collect()
}

/// Parses and applies `names` in order.
pub fn apply_operations<S: AsRef<str>>(column: &Column, names: &[S]) -> Result<Column, CdmError> {
    let mut current = column.clone();
    for name in names {
        let op: ColumnOperation = name.as_ref().parse()?;
        current = op.apply(&current);
    }
    Ok(current)
}
