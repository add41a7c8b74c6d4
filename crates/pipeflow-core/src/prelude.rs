//! Convenient re-exports for downstream crates.

pub use crate::config::{Parallelism, PipelineConfig};
pub use crate::error::{Error, Result};
pub use crate::record::Record;
pub use crate::value::{FromValue, Value};
