//! CDM value transformation utilities.
//!
//! - **datetime**: lenient timestamp and date parsing for source values
//! - **formatter**: coercion of columns to target logical types, check mode
//! - **operations**: named column operations referenced by mapping rules

pub mod datetime;
pub mod formatter;
pub mod operations;

pub use datetime::{parse_date, parse_timestamp, value_to_date, value_to_timestamp};
pub use formatter::{
    CheckReport, check_column, coerce_value, format_checked, format_column, is_formatted,
};
pub use operations::{ColumnOperation, apply_operations};
