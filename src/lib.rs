#![forbid(unsafe_code)]
//! pipeflow: composable, lazily evaluated pipelines over schema-less records.
//!
//! This crate only re-exports the workspace members:
//! - `pipeflow-core`: `Value`, `Record`, `Error`, `PipelineConfig`
//! - `pipeflow-ops`: sources, operators, the lazy `Pipeline`, `Terminal`
//! - `pipeflow-exec`: builder/executable, parallel and paged pipelines

pub use pipeflow_core;
pub use pipeflow_exec;
pub use pipeflow_ops;

pub mod prelude {
    pub use pipeflow_core::prelude::*;
    pub use pipeflow_exec::{
        ExecutablePipeline, PagedPipeline, ParallelPipeline, PipelineBuilder, RemoteQuery,
        SupportsAsyncSingleShot, WorkerPool,
    };
    pub use pipeflow_ops::{
        aggregate, from_fn, try_from_fn, Aggregator, CollectSink, Element, Op, Pipeline,
        PipelineResult, RecordPipeline, RowIter, Sink, Source, Terminal,
    };
}
