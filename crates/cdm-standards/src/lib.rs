#![deny(unsafe_code)]

pub mod error;
pub mod hash;
pub mod loaders;
pub mod manifest;
pub mod paths;
pub mod registry;

pub use crate::error::StandardsError;
pub use crate::paths::{STANDARDS_ENV_VAR, standards_root};
pub use crate::registry::{SchemaRegistry, SchemaVersion, VerifySummary};
