//! Parallel decorator over a lazy pipeline.
//!
//! Every intermediate call here is eager: it evaluates the whole inner
//! pipeline, runs the one operator on the worker pool, and hands back a lazy
//! `Pipeline` over the materialized result. Filter, map, flat-map and distinct
//! make no ordering promise; sorts restore a defined order.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use pipeflow_core::{Error, Parallelism, Result};
use pipeflow_ops::{bridge, Element, Interrupt, Pipeline, RowIter, Source, Terminal};

use crate::pool::WorkerPool;

pub struct ParallelPipeline<T> {
    inner: Pipeline<T>,
    pool: WorkerPool,
    parallelism: Parallelism,
}

impl<T> Clone for ParallelPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            pool: self.pool.clone(),
            parallelism: self.parallelism,
        }
    }
}

impl<T: Element> ParallelPipeline<T> {
    /// Starts a dedicated pool sized to `parallelism`.
    pub fn new(inner: Pipeline<T>, parallelism: Parallelism) -> Result<Self> {
        Ok(Self::on_pool(inner, parallelism, WorkerPool::new(parallelism)?))
    }

    /// Run on a caller-supplied pool, e.g. `WorkerPool::inline()` in tests.
    /// `parallelism` still bounds async for-each.
    pub fn on_pool(inner: Pipeline<T>, parallelism: Parallelism, pool: WorkerPool) -> Self {
        Self {
            inner,
            pool,
            parallelism,
        }
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    fn rewrap<U: Element + Clone>(&self, items: Vec<U>) -> Pipeline<U> {
        self.inner.over(items)
    }

    fn materialize(&self) -> Result<Vec<T>> {
        tracing::trace!(threads = self.pool.threads(), "parallel stage");
        self.inner.to_list()
    }

    /// Remaining items are taken in inner order; nothing runs until a terminal
    /// call on the result.
    pub fn take(&self, count: usize) -> Pipeline<T> {
        self.inner.take(count)
    }

    pub fn skip(&self, count: usize) -> Pipeline<T> {
        self.inner.skip(count)
    }

    /// Push-style for-each across the worker pool. Items are owned by exactly
    /// one worker; the first error is returned once the pool stops.
    pub fn try_for_each<F>(&self, action: F) -> Result<()>
    where
        F: Fn(T) -> Result<()> + Send + Sync,
    {
        let items = self.inner.to_list()?;
        tracing::debug!(
            items = items.len(),
            threads = self.pool.threads(),
            "parallel for_each"
        );
        self.pool.try_for_each(items, action)
    }

    pub fn for_each<F>(&self, action: F) -> Result<()>
    where
        F: Fn(T) + Send + Sync,
    {
        self.try_for_each(|item| {
            action(item);
            Ok(())
        })
    }

    /// One task per item, all spawned up front. A semaphore sized to the
    /// bound limits how many run at once; unbounded means no semaphore.
    /// Cancellation stops spawning and makes queued tasks return early, it
    /// does not interrupt an action already running.
    pub async fn for_each_async<F, Fut>(&self, action: F, cancel: CancellationToken) -> Result<()>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let items = tokio::task::spawn_blocking(move || inner.to_list())
            .await
            .map_err(join_failure)??;

        let limit = self.parallelism.bound().map(|n| Arc::new(Semaphore::new(n)));
        let action = Arc::new(action);
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for item in items {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let limit = limit.clone();
            let action = Arc::clone(&action);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = match limit {
                    Some(sem) => match sem.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => return Err(Error::Worker(e.to_string())),
                    },
                    None => None,
                };
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                (*action)(item).await
            });
        }
        tracing::debug!(tasks = tasks.len(), cancelled, "parallel for_each_async");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined.map_err(join_failure).and_then(|outcome| outcome) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None if cancelled => Err(Error::Cancelled),
            None => Ok(()),
        }
    }
}

impl<T: Element + Clone> ParallelPipeline<T> {
    pub fn filter<F>(&self, predicate: F) -> Result<Pipeline<T>>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        let items = self.pool.filter(self.materialize()?, predicate)?;
        Ok(self.rewrap(items))
    }

    pub fn map<U, F>(&self, selector: F) -> Result<Pipeline<U>>
    where
        U: Element + Clone,
        F: Fn(T) -> U + Send + Sync,
    {
        let items = self.pool.map(self.materialize()?, selector)?;
        Ok(self.rewrap(items))
    }

    pub fn flat_map<U, I, F>(&self, selector: F) -> Result<Pipeline<U>>
    where
        U: Element + Clone,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync,
    {
        let items = self.pool.flat_map(self.materialize()?, selector)?;
        Ok(self.rewrap(items))
    }

    pub fn distinct(&self) -> Result<Pipeline<T>>
    where
        T: Eq + Hash,
    {
        let unique = self.pool.distinct(self.materialize()?)?;
        Ok(self.rewrap(unique))
    }

    pub fn sort_by_key<K, F>(&self, key: F) -> Result<Pipeline<T>>
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync,
    {
        self.sorted(key, false)
    }

    pub fn sort_by_key_descending<K, F>(&self, key: F) -> Result<Pipeline<T>>
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync,
    {
        self.sorted(key, true)
    }

    fn sorted<K, F>(&self, key: F, descending: bool) -> Result<Pipeline<T>>
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync,
    {
        let items = self
            .pool
            .sort(self.materialize()?, |a, b| key(a).cmp(&key(b)), descending)?;
        Ok(self.rewrap(items))
    }
}

impl<T: Element> Terminal<T> for ParallelPipeline<T> {
    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn iter(&self) -> RowIter<'_, T> {
        self.inner.iter()
    }

    fn iter_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        self.inner.rows_until(stop)
    }

    fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>> {
        bridge::offload(self.clone(), self.inner.channel_capacity(), cancel)
    }
}

fn join_failure(e: JoinError) -> Error {
    if e.is_panic() {
        Error::from_panic(e.into_panic())
    } else {
        Error::Worker(e.to_string())
    }
}
