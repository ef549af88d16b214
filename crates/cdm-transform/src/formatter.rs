//! Coercion of columns to the logical type of their target field.
//!
//! Formatting always returns a new column. Values that cannot be coerced
//! become null, and canonical values are fixed points.

use tracing::debug;

use cdm_model::{CdmError, Column, FieldDefinition, LogicalType, Value};

use crate::datetime::{value_to_date, value_to_timestamp};

/// Coerces one value to `logical_type`, or `Null` when it does not conform.
pub fn coerce_value(logical_type: LogicalType, value: &Value) -> Value {
    match (logical_type, value) {
        (_, Value::Null) => Value::Null,
        (LogicalType::Integer, v) => coerce_integer(v),
        (LogicalType::Float, v) => coerce_float(v),
        (LogicalType::Text { max_len }, v) => {
            let text = v.canonical();
            match max_len {
                Some(limit) if text.chars().count() > limit => {
                    Value::text(text.chars().take(limit).collect::<String>())
                }
                _ => Value::text(text),
            }
        }
        (LogicalType::Timestamp, v) => value_to_timestamp(v).map_or(Value::Null, Value::Timestamp),
        (LogicalType::Date, v) => value_to_date(v).map_or(Value::Null, Value::Date),
    }
}

fn coerce_integer(value: &Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(*i),
        Value::Float(f) => integral(*f),
        Value::Text(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => trimmed.parse::<f64>().map_or(Value::Null, integral),
            }
        }
        _ => Value::Null,
    }
}

fn integral(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::Int(f as i64)
    } else {
        Value::Null
    }
}

fn coerce_float(value: &Value) -> Value {
    let parsed = match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .map_or(Value::Null, Value::Float)
}

/// Formats a column without touching the input.
pub fn format_column(logical_type: LogicalType, column: &Column) -> Column {
    format_checked(logical_type, column).0
}

/// Formats a column and reports the rows that were non-null before and null after.
pub fn format_checked(logical_type: LogicalType, column: &Column) -> (Column, Vec<usize>) {
    let mut failures = Vec::new();
    let values = column
        .values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let coerced = coerce_value(logical_type, value);
            if coerced.is_null() && !value.is_null() {
                failures.push(idx);
            }
            coerced
        })
        .collect();
    (Column::new(column.name.clone(), values), failures)
}

/// Outcome of sampling a column in check mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckReport {
    pub sampled: usize,
    pub failures: usize,
}

impl CheckReport {
    pub fn failure_fraction(&self) -> f64 {
        if self.sampled == 0 {
            0.0
        } else {
            self.failures as f64 / self.sampled as f64
        }
    }
}

/// Whether `value` is already in the canonical form of `logical_type`.
pub fn is_formatted(logical_type: LogicalType, value: &Value) -> bool {
    let coerced = coerce_value(logical_type, value);
    !coerced.is_null() && coerced.canonical() == value.canonical()
}

/// Samples the first `sample_size` non-null values and fails with
/// `DataStandardError` when the share that formatting would change exceeds
/// `tolerance`.
pub fn check_column(
    table: &str,
    field: &FieldDefinition,
    column: &Column,
    sample_size: usize,
    tolerance: f64,
) -> Result<CheckReport, CdmError> {
    let mut report = CheckReport {
        sampled: 0,
        failures: 0,
    };
    for value in column.values.iter().filter(|v| !v.is_null()).take(sample_size) {
        report.sampled += 1;
        if !is_formatted(field.logical_type, value) {
            report.failures += 1;
        }
    }
    debug!(
        table,
        field = %field.name,
        sampled = report.sampled,
        failures = report.failures,
        "checked column"
    );
    if report.failure_fraction() > tolerance {
        return Err(CdmError::DataStandardError {
            table: table.to_string(),
            field: field.name.clone(),
            logical_type: field.logical_type.to_string(),
            failures: report.failures,
            sampled: report.sampled,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(values: Vec<Value>) -> Column {
        Column::new("x", values)
    }

    #[test]
    fn integers_accept_integral_floats() {
        let input = col(vec!["3".into(), "3.0".into(), "3.5".into(), "abc".into(), Value::Null]);
        let (out, failures) = format_checked(LogicalType::Integer, &input);
        assert_eq!(
            out.values,
            vec![Value::Int(3), Value::Int(3), Value::Null, Value::Null, Value::Null]
        );
        assert_eq!(failures, vec![2, 3]);
        assert_eq!(input.values[0], Value::from("3"));
    }

    #[test]
    fn text_is_truncated_by_characters() {
        let input = col(vec!["héllo world".into(), Value::Int(42)]);
        let out = format_column(LogicalType::Text { max_len: Some(5) }, &input);
        assert_eq!(out.values, vec![Value::from("héllo"), Value::from("42")]);
    }

    #[test]
    fn timestamps_and_dates() {
        let input = col(vec!["2020-05-01".into(), "2020-05-01T08:00:00".into(), "junk".into()]);
        let ts = format_column(LogicalType::Timestamp, &input);
        assert_eq!(ts.values[0].canonical(), "2020-05-01 00:00:00.000000");
        assert_eq!(ts.values[1].canonical(), "2020-05-01 08:00:00.000000");
        assert!(ts.values[2].is_null());
        let dates = format_column(LogicalType::Date, &ts);
        assert_eq!(dates.values[1].canonical(), "2020-05-01");
    }

    #[test]
    fn check_mode_enforces_tolerance() {
        let field = FieldDefinition::new("year_of_birth", LogicalType::Integer);
        let mostly_bad = col(vec!["1980".into(), "unknown".into(), "n/a".into(), Value::Null]);
        let err = check_column("person", &field, &mostly_bad, 10, 0.5).expect_err("too many");
        assert!(matches!(
            err,
            CdmError::DataStandardError {
                failures: 2,
                sampled: 3,
                ..
            }
        ));
        let report = check_column("person", &field, &mostly_bad, 10, 0.7).expect("within");
        assert_eq!(report.failures, 2);
        let sampled_one = check_column("person", &field, &mostly_bad, 1, 0.0).expect("first ok");
        assert_eq!(sampled_one.sampled, 1);
    }

    #[test]
    fn check_mode_rejects_coercible_but_unformatted_values() {
        let year = FieldDefinition::new("year_of_birth", LogicalType::Integer);
        let padded = col(vec!["1980.0".into(), " 1981 ".into(), "1982.0".into()]);
        let err = check_column("person", &year, &padded, 50, 0.0).expect_err("unformatted");
        assert!(matches!(
            err,
            CdmError::DataStandardError {
                failures: 3,
                sampled: 3,
                ..
            }
        ));

        let birth = FieldDefinition::new("birth_date", LogicalType::Date);
        let dates = col(vec!["31/12/1980".into(), "1980-12-31 23:59:59".into(), "1980-12-31".into()]);
        let report = check_column("person", &birth, &dates, 50, 0.7).expect("within");
        assert_eq!(report.failures, 2);

        let stamp = FieldDefinition::new("birth_datetime", LogicalType::Timestamp);
        let iso = col(vec!["2020-05-01T08:00:00".into()]);
        assert!(check_column("person", &stamp, &iso, 50, 0.0).is_err());
        let canonical = format_column(LogicalType::Timestamp, &iso);
        let report = check_column("person", &stamp, &canonical, 50, 0.0).expect("canonical");
        assert_eq!(report.failures, 0);
    }
}
