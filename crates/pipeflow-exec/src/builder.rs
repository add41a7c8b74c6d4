//! Two-phase pipeline: a mutable builder that queues operators and settings,
//! then `build()` into an immutable `ExecutablePipeline`.
//!
//! Lazy composition is scoped per element type. A type-changing call (`map`,
//! `flat_map`, `batch`) freezes the operators queued so far into a source of the new
//! type and continues from an empty operator list.

use std::hash::Hash;
use std::sync::Arc;

use pipeflow_core::{Error, Parallelism, PipelineConfig, Result};
use pipeflow_ops::{chunked, Element, Interrupt, Op, RowIter, Source};

use crate::executable::ExecutablePipeline;
use crate::pool::WorkerPool;

pub struct PipelineBuilder<T> {
    source: Arc<dyn Source<T>>,
    ops: Vec<Op<T>>,
    config: PipelineConfig,
    pool: Option<WorkerPool>,
}

impl<T: Element> PipelineBuilder<T> {
    pub fn new(source: impl Source<T> + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<dyn Source<T>>) -> Self {
        Self {
            source,
            ops: Vec::new(),
            config: PipelineConfig::default(),
            pool: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn then(mut self, op: Op<T>) -> Self {
        self.ops.push(op);
        self
    }

    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.then(Op::filter(predicate))
    }

    pub fn take(self, count: usize) -> Self {
        self.then(Op::Take(count))
    }

    pub fn skip(self, count: usize) -> Self {
        self.then(Op::Skip(count))
    }

    pub fn distinct(self) -> Self
    where
        T: Eq + Hash + Clone,
    {
        self.then(Op::distinct())
    }

    pub fn sort_by_key<K, F>(self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.then(Op::sort_by_key(key, false))
    }

    pub fn sort_by_key_descending<K, F>(self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.then(Op::sort_by_key(key, true))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::precondition("batch size must be greater than zero"));
        }
        self.config.batch_size = batch_size;
        Ok(self)
    }

    /// Evaluate filter and sort stages on a worker pool bounded by
    /// `parallelism`. An injected pool (`with_pool`) is kept as is.
    pub fn as_parallel(mut self, parallelism: Parallelism) -> Result<Self> {
        self.config.parallel = true;
        self.config.max_parallelism = parallelism;
        self.ensure_pool()?;
        Ok(self)
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        self.ensure_pool()?;
        Ok(self)
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    fn ensure_pool(&mut self) -> Result<()> {
        if self.config.parallel && self.pool.is_none() {
            self.pool = Some(WorkerPool::new(self.config.max_parallelism)?);
        }
        Ok(())
    }

    /// Freeze everything queued so far.
    pub fn build(self) -> ExecutablePipeline<T> {
        tracing::debug!(
            ops = self.ops.len(),
            parallel = self.config.parallel,
            batch_size = self.config.batch_size,
            "pipeline built"
        );
        ExecutablePipeline::new(self.source, self.ops, self.config, self.pool)
    }

    /// Freeze the queued operators and continue from a new stage built over
    /// them. Configuration and pool carry forward.
    fn continue_with<U, F>(self, stage: F) -> PipelineBuilder<U>
    where
        U: Element,
        F: FnOnce(ExecutablePipeline<T>) -> Arc<dyn Source<U>>,
    {
        let upstream = self.build();
        let config = upstream.config().clone();
        let pool = upstream.pool().cloned();
        PipelineBuilder {
            source: stage(upstream),
            ops: Vec::new(),
            config,
            pool,
        }
    }

    /// Projection to a new element type. Runs on the pool when the frozen
    /// stage is parallel.
    pub fn map<U, F>(self, selector: F) -> PipelineBuilder<U>
    where
        U: Element,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.continue_with(|upstream| -> Arc<dyn Source<U>> {
            Arc::new(MappedStage {
                upstream,
                selector: Arc::new(selector),
            })
        })
    }

    pub fn flat_map<U, I, F>(self, selector: F) -> PipelineBuilder<U>
    where
        U: Element,
        I: IntoIterator<Item = U>,
        I::IntoIter: Send + 'static,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        let expand: Expand<T, U> = Arc::new(move |item| {
            Box::new(selector(item).into_iter()) as Box<dyn Iterator<Item = U> + Send>
        });
        self.continue_with(|upstream| -> Arc<dyn Source<U>> {
            Arc::new(FlatMappedStage { upstream, expand })
        })
    }

    /// Chunk the stream into groups of `size`; the last group may be shorter.
    pub fn batch(self, size: usize) -> Result<PipelineBuilder<Vec<T>>> {
        if size == 0 {
            return Err(Error::precondition("batch size must be greater than zero"));
        }
        Ok(self.continue_with(|upstream| -> Arc<dyn Source<Vec<T>>> {
            Arc::new(BatchedStage { upstream, size })
        }))
    }

    /// `batch` with the configured batch size.
    pub fn batched(self) -> PipelineBuilder<Vec<T>> {
        let size = self.config.batch_size.max(1);
        self.continue_with(|upstream| -> Arc<dyn Source<Vec<T>>> {
            Arc::new(BatchedStage { upstream, size })
        })
    }
}

type Expand<T, U> = Arc<dyn Fn(T) -> Box<dyn Iterator<Item = U> + Send> + Send + Sync>;

struct MappedStage<T, U> {
    upstream: ExecutablePipeline<T>,
    selector: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T: Element, U: Element> MappedStage<T, U> {
    fn project<'a>(&'a self, input: RowIter<'a, T>) -> RowIter<'a, U> {
        let selector = Arc::clone(&self.selector);
        match self.upstream.parallel_pool() {
            Some(pool) => {
                let mapped = input
                    .collect::<Result<Vec<T>>>()
                    .and_then(|items| pool.map(items, |x| selector(x)));
                materialized(mapped)
            }
            None => Box::new(input.map(move |item| item.map(|v| selector(v)))),
        }
    }
}

impl<T: Element, U: Element> Source<U> for MappedStage<T, U> {
    fn rows(&self) -> RowIter<'_, U> {
        self.project(self.upstream.rows())
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, U> {
        self.project(self.upstream.rows_until(stop))
    }
}

struct FlatMappedStage<T, U> {
    upstream: ExecutablePipeline<T>,
    expand: Expand<T, U>,
}

impl<T: Element, U: Element> FlatMappedStage<T, U> {
    fn project<'a>(&'a self, input: RowIter<'a, T>) -> RowIter<'a, U> {
        let expand = Arc::clone(&self.expand);
        match self.upstream.parallel_pool() {
            Some(pool) => {
                let expanded = input
                    .collect::<Result<Vec<T>>>()
                    .and_then(|items| pool.flat_map(items, |x| expand(x)));
                materialized(expanded)
            }
            None => Box::new(input.flat_map(
                move |item| -> Box<dyn Iterator<Item = Result<U>> + Send> {
                    match item {
                        Ok(v) => Box::new(expand(v).map(Ok)),
                        Err(e) => Box::new(std::iter::once(Err(e))),
                    }
                },
            )),
        }
    }
}

impl<T: Element, U: Element> Source<U> for FlatMappedStage<T, U> {
    fn rows(&self) -> RowIter<'_, U> {
        self.project(self.upstream.rows())
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, U> {
        self.project(self.upstream.rows_until(stop))
    }
}

struct BatchedStage<T> {
    upstream: ExecutablePipeline<T>,
    size: usize,
}

impl<T: Element> Source<Vec<T>> for BatchedStage<T> {
    fn rows(&self) -> RowIter<'_, Vec<T>> {
        chunked(self.upstream.rows(), self.size)
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, Vec<T>> {
        chunked(self.upstream.rows_until(stop), self.size)
    }
}

fn materialized<'a, U: Element>(outcome: Result<Vec<U>>) -> RowIter<'a, U> {
    match outcome {
        Ok(items) => Box::new(items.into_iter().map(Ok)),
        Err(e) => Box::new(std::iter::once(Err(e))),
    }
}
