//! Frozen pipeline produced by `PipelineBuilder::build`.

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use pipeflow_core::{PipelineConfig, Result};
use pipeflow_ops::{apply_all, bridge, Element, Interrupt, Op, RowIter, Source, Terminal};

use crate::pool::WorkerPool;

/// Immutable source, operator list, configuration and pool. Every terminal
/// call replays the operators from a fresh source pass.
pub struct ExecutablePipeline<T> {
    source: Arc<dyn Source<T>>,
    ops: Arc<[Op<T>]>,
    config: PipelineConfig,
    pool: Option<WorkerPool>,
}

impl<T> Clone for ExecutablePipeline<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            ops: Arc::clone(&self.ops),
            config: self.config.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<T: Element> ExecutablePipeline<T> {
    pub(crate) fn new(
        source: Arc<dyn Source<T>>,
        ops: Vec<Op<T>>,
        config: PipelineConfig,
        pool: Option<WorkerPool>,
    ) -> Self {
        Self {
            source,
            ops: ops.into(),
            config,
            pool,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn operations(&self) -> &[Op<T>] {
        &self.ops
    }

    /// The pool parallel stages run on, if this pipeline is parallel at all.
    /// A worker bound of one (or an inline pool) means sequential.
    pub(crate) fn parallel_pool(&self) -> Option<WorkerPool> {
        if !self.config.parallel || self.config.max_parallelism.is_sequential() {
            return None;
        }
        self.pool
            .as_ref()
            .filter(|pool| !pool.is_inline())
            .map(|pool| pool.with_batch_size(self.config.batch_size))
    }

    pub(crate) fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    fn apply_operations(&self) -> RowIter<'_, T> {
        self.apply_over(self.source.rows())
    }

    fn apply_over<'a>(&'a self, input: RowIter<'a, T>) -> RowIter<'a, T> {
        match self.parallel_pool() {
            Some(pool) => {
                tracing::trace!(
                    ops = self.ops.len(),
                    threads = pool.threads(),
                    "parallel pass"
                );
                match self.apply_pooled(input, &pool) {
                    Ok(items) => Box::new(items.into_iter().map(Ok)),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                }
            }
            None => apply_all(self.ops.iter(), input),
        }
    }

    /// Parallel pass: the source is collected once, filters and sorts run on
    /// the pool, the order-sensitive operators run inline between them.
    fn apply_pooled(&self, input: RowIter<'_, T>, pool: &WorkerPool) -> Result<Vec<T>> {
        let mut items = input.collect::<Result<Vec<T>>>()?;
        for op in self.ops.iter() {
            items = match op {
                Op::Filter(pred) => pool.filter(items, |x| pred(x))?,
                Op::Sort {
                    compare,
                    descending,
                } => pool.sort(items, |a, b| compare(a, b), *descending)?,
                other => other
                    .apply(Box::new(items.into_iter().map(Ok)))
                    .collect::<Result<Vec<T>>>()?,
            };
        }
        Ok(items)
    }

    /// Pull-style pass. Restartable: each call re-runs the chain.
    pub fn stream(&self) -> RowIter<'_, T> {
        self.apply_operations()
    }

    /// Async pull with cooperative cancellation, buffered by
    /// `config.channel_capacity`.
    pub fn stream_async(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>> {
        bridge::offload(self.clone(), self.config.channel_capacity, cancel)
    }
}

impl<T: Element> Source<T> for ExecutablePipeline<T> {
    fn rows(&self) -> RowIter<'_, T> {
        self.apply_operations()
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        self.apply_over(self.source.rows_until(stop))
    }
}

impl<T: Element> Terminal<T> for ExecutablePipeline<T> {
    fn kind(&self) -> &'static str {
        "executable"
    }

    fn iter(&self) -> RowIter<'_, T> {
        tracing::debug!(
            ops = self.ops.len(),
            parallel = self.config.parallel,
            "executable pass"
        );
        self.apply_operations()
    }

    fn iter_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        self.rows_until(stop)
    }

    fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>> {
        self.stream_async(cancel)
    }
}
