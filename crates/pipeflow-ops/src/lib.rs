#![forbid(unsafe_code)]
//! pipeflow-ops: sources, tagged operators, and the lazy pipeline.
//!
//! - `source`: the restartable `Source` boundary and closure-backed sources.
//! - `op`: the `Op` list replayed over each pass.
//! - `lazy`: the immutable `Pipeline` value.
//! - `records`: column operators and grouping for `Pipeline<Record>`.
//! - `terminal`: sync/async terminal accessors shared by every pipeline form.
//! - `bridge`: moves a blocking pass onto the blocking pool behind a stream.

pub mod bridge;
pub mod lazy;
pub mod op;
pub mod records;
pub mod sink;
pub mod source;
pub mod terminal;

pub use lazy::Pipeline;
pub use op::{apply_all, chunked, Op};
pub use records::{aggregate, Aggregator, RecordPipeline};
pub use sink::{CollectSink, Sink};
pub use source::{from_fn, interruptible, try_from_fn, Element, Interrupt, RowIter, Source};
pub use terminal::{PipelineResult, Terminal};
