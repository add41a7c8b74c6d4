#![forbid(unsafe_code)]
//! pipeflow-core: records, values, errors, and configuration.
//!
//! Everything here is plain data. Sources, operators, and evaluation
//! strategies live in `pipeflow-ops` and `pipeflow-exec`.

pub mod config;
pub mod error;
pub mod prelude;
pub mod record;
pub mod value;

pub use config::{Parallelism, PipelineConfig};
pub use error::{Error, Result};
pub use record::Record;
pub use value::{FromValue, Value};
