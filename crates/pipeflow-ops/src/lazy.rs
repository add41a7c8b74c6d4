//! Lazy pipeline: an immutable source handle plus a shared operator chain.
//!
//! Each intermediate call returns a new `Pipeline` whose chain points at the
//! previous one (structural sharing). Type-changing calls (`map`, `flat_map`,
//! `batch`) start a new pipeline whose source is the previous pipeline.

use std::hash::Hash;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use pipeflow_core::{Error, PipelineConfig, Result};

use crate::bridge;
use crate::op::{apply_all, chunked, Op};
use crate::source::{Element, Interrupt, RowIter, Source};
use crate::terminal::Terminal;

struct Stage<T> {
    prev: Option<Arc<Stage<T>>>,
    op: Op<T>,
}

pub struct Pipeline<T> {
    source: Arc<dyn Source<T>>,
    tail: Option<Arc<Stage<T>>>,
    depth: usize,
    /// Buffer between the blocking producer and async consumers.
    capacity: usize,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            tail: self.tail.clone(),
            depth: self.depth,
            capacity: self.capacity,
        }
    }
}

impl<T: Element> Pipeline<T> {
    pub fn new(source: impl Source<T> + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<dyn Source<T>>) -> Self {
        Self {
            source,
            tail: None,
            depth: 0,
            capacity: PipelineConfig::default().channel_capacity,
        }
    }

    /// A fresh pipeline over `upstream` that keeps this one's stream settings.
    pub fn over<U: Element>(&self, upstream: impl Source<U> + 'static) -> Pipeline<U> {
        Pipeline {
            capacity: self.capacity,
            ..Pipeline::new(upstream)
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::precondition("channel capacity must be greater than zero"));
        }
        self.capacity = capacity;
        Ok(self)
    }

    pub fn channel_capacity(&self) -> usize {
        self.capacity
    }

    /// Append any same-type operator.
    pub fn then(&self, op: Op<T>) -> Self {
        Self {
            source: Arc::clone(&self.source),
            tail: Some(Arc::new(Stage {
                prev: self.tail.clone(),
                op,
            })),
            depth: self.depth + 1,
            capacity: self.capacity,
        }
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.then(Op::filter(predicate))
    }

    pub fn take(&self, count: usize) -> Self {
        self.then(Op::Take(count))
    }

    pub fn skip(&self, count: usize) -> Self {
        self.then(Op::Skip(count))
    }

    pub fn distinct(&self) -> Self
    where
        T: Eq + Hash + Clone,
    {
        self.then(Op::distinct())
    }

    pub fn sort_by_key<K, F>(&self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.then(Op::sort_by_key(key, false))
    }

    pub fn sort_by_key_descending<K, F>(&self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.then(Op::sort_by_key(key, true))
    }

    /// Projection to a new element type. The result is a fresh pipeline over
    /// this one; nothing is evaluated here.
    pub fn map<U, F>(&self, selector: F) -> Pipeline<U>
    where
        U: Element,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.over(Mapped {
            upstream: self.clone(),
            selector: Arc::new(selector),
        })
    }

    pub fn flat_map<U, I, F>(&self, selector: F) -> Pipeline<U>
    where
        U: Element,
        I: IntoIterator<Item = U>,
        I::IntoIter: Send + 'static,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        let expand: FlatSelector<T, U> = Arc::new(move |item| {
            Box::new(selector(item).into_iter()) as Box<dyn Iterator<Item = U> + Send>
        });
        self.over(FlatMapped {
            upstream: self.clone(),
            selector: expand,
        })
    }

    /// Group items into chunks of `size`, streaming: a chunk is emitted as
    /// soon as it fills, and the last one may be shorter.
    pub fn batch(&self, size: usize) -> Result<Pipeline<Vec<T>>> {
        if size == 0 {
            return Err(Error::precondition("batch size must be greater than zero"));
        }
        Ok(self.over(Batched {
            upstream: self.clone(),
            size,
        }))
    }

    /// Operators queued since the last type change, oldest first.
    pub fn operations(&self) -> Vec<Op<T>> {
        let mut ops = Vec::with_capacity(self.depth);
        let mut cursor = self.tail.as_deref();
        while let Some(stage) = cursor {
            ops.push(stage.op.clone());
            cursor = stage.prev.as_deref();
        }
        ops.reverse();
        ops
    }

    pub fn source(&self) -> &Arc<dyn Source<T>> {
        &self.source
    }
}

impl<T: Element> Source<T> for Pipeline<T> {
    fn rows(&self) -> RowIter<'_, T> {
        let ops = self.operations();
        tracing::trace!(ops = ops.len(), "lazy pipeline pass");
        apply_all(&ops, self.source.rows())
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        apply_all(&self.operations(), self.source.rows_until(stop))
    }
}

impl<T: Element> Terminal<T> for Pipeline<T> {
    fn kind(&self) -> &'static str {
        "lazy"
    }

    fn iter(&self) -> RowIter<'_, T> {
        self.rows()
    }

    fn iter_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        self.rows_until(stop)
    }

    fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>> {
        bridge::offload(self.clone(), self.capacity, cancel)
    }
}

type FlatSelector<T, U> = Arc<dyn Fn(T) -> Box<dyn Iterator<Item = U> + Send> + Send + Sync>;

struct Mapped<T, U> {
    upstream: Pipeline<T>,
    selector: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T: Element, U: Element> Mapped<T, U> {
    fn project<'a>(&self, input: RowIter<'a, T>) -> RowIter<'a, U> {
        let selector = Arc::clone(&self.selector);
        Box::new(input.map(move |item| item.map(|v| selector(v))))
    }
}

impl<T: Element, U: Element> Source<U> for Mapped<T, U> {
    fn rows(&self) -> RowIter<'_, U> {
        self.project(self.upstream.rows())
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, U> {
        self.project(self.upstream.rows_until(stop))
    }
}

struct FlatMapped<T, U> {
    upstream: Pipeline<T>,
    selector: FlatSelector<T, U>,
}

impl<T: Element, U: Element> FlatMapped<T, U> {
    fn expand<'a>(&self, input: RowIter<'a, T>) -> RowIter<'a, U> {
        let selector = Arc::clone(&self.selector);
        Box::new(input.flat_map(
            move |item| -> Box<dyn Iterator<Item = Result<U>> + Send> {
                match item {
                    Ok(v) => Box::new(selector(v).map(Ok)),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                }
            },
        ))
    }
}

impl<T: Element, U: Element> Source<U> for FlatMapped<T, U> {
    fn rows(&self) -> RowIter<'_, U> {
        self.expand(self.upstream.rows())
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, U> {
        self.expand(self.upstream.rows_until(stop))
    }
}

struct Batched<T> {
    upstream: Pipeline<T>,
    size: usize,
}

impl<T: Element> Source<Vec<T>> for Batched<T> {
    fn rows(&self) -> RowIter<'_, Vec<T>> {
        chunked(self.upstream.rows(), self.size)
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, Vec<T>> {
        chunked(self.upstream.rows_until(stop), self.size)
    }
}
