#![deny(unsafe_code)]

pub mod document;
pub mod resolver;

pub use document::{delta, filter_tables, load_rules, parse_rules, save_rules, validate_rules};
pub use resolver::{ResolvedField, apply_term_mapping, resolve_rule};
