pub mod batch;
pub mod error;
pub mod frame;
pub mod lookup;
pub mod mapping;
pub mod options;
pub mod provenance;
pub mod run_log;
pub mod schema;
pub mod value;

pub use batch::{Column, RowBatch, TableSet};
pub use error::{CdmError, Result};
pub use frame::any_to_value;
pub use lookup::{
    CaseInsensitiveSet, FIELD_NAME_LIMIT, NameMatch, TABLE_NAME_LIMIT, resolve_name,
};
pub use mapping::{MappingRule, RuleDocument, RuleMetadata, RuleSet, TermMapping};
pub use options::{FormatPolicy, RunConfig};
pub use provenance::{FieldProvenance, ProvenanceMap, SourceRef};
pub use run_log::{RequiredCount, RuleSetLog, RunLog, TableLog};
pub use schema::{FieldDefinition, LogicalType, TableDefinition};
pub use value::{DATE_FORMAT, TIMESTAMP_FORMAT, Value};
