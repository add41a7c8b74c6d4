#![forbid(unsafe_code)]
//! pipeflow-exec: evaluation strategies on top of the operator crate.
//!
//! - `builder` / `executable`: two-phase pipeline with optional pooled stages.
//! - `parallel`: eager-per-stage decorator with pooled and task-per-item for-each.
//! - `paged`: page-at-a-time walk over a remote-queryable source.
//! - `pool`: the worker pool every parallel stage runs on.

pub mod builder;
pub mod executable;
pub mod paged;
pub mod parallel;
pub mod pool;

pub use builder::PipelineBuilder;
pub use executable::ExecutablePipeline;
pub use paged::{PagedPipeline, RemoteQuery, SupportsAsyncSingleShot};
pub use parallel::ParallelPipeline;
pub use pool::WorkerPool;
