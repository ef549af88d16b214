//! Library side of the `cdm` binary: logging setup, run settings and input loading.

pub mod inputs;
pub mod logging;
pub mod settings;
