//! Worker pool owned by a pipeline configuration.
//!
//! Parallel stages never touch the global rayon pool: a `WorkerPool` is built
//! from a `Parallelism` (or injected by the caller) and travels with the
//! pipeline that uses it. `WorkerPool::inline()` runs every stage on the
//! calling thread, which gives tests a deterministic single-worker pool.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use pipeflow_core::{Error, Parallelism, Result};
use pipeflow_ops::Element;

#[derive(Clone)]
enum Workers {
    Inline,
    Threads(Arc<ThreadPool>),
}

#[derive(Clone)]
pub struct WorkerPool {
    workers: Workers,
    /// Minimum items handed to one worker per split.
    min_len: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("min_len", &self.min_len)
            .finish()
    }
}

impl WorkerPool {
    pub fn inline() -> Self {
        Self {
            workers: Workers::Inline,
            min_len: 1,
        }
    }

    /// A bound of one yields an inline pool; anything else gets dedicated
    /// threads (`Unbounded` resolves to the hardware default).
    pub fn new(parallelism: Parallelism) -> Result<Self> {
        if parallelism.is_sequential() {
            return Ok(Self::inline());
        }
        let threads = parallelism.resolve();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pipeflow-worker-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("worker pool: {e}")))?;
        tracing::debug!(threads, "worker pool started");
        Ok(Self {
            workers: Workers::Threads(Arc::new(pool)),
            min_len: 1,
        })
    }

    /// Same workers, different split granularity.
    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        Self {
            workers: self.workers.clone(),
            min_len: batch_size.max(1),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.workers, Workers::Inline)
    }

    pub fn threads(&self) -> usize {
        match &self.workers {
            Workers::Inline => 1,
            Workers::Threads(pool) => pool.current_num_threads(),
        }
    }

    /// Run `job` on the pool; panics from user closures become
    /// `Error::Worker`. The flag tells the job whether it may use rayon.
    fn run<R, J>(&self, job: J) -> Result<R>
    where
        R: Send,
        J: FnOnce(bool) -> R + Send,
    {
        panic::catch_unwind(AssertUnwindSafe(|| match &self.workers {
            Workers::Inline => job(false),
            Workers::Threads(pool) => pool.install(|| job(true)),
        }))
        .map_err(Error::from_panic)
    }

    pub fn filter<T, F>(&self, items: Vec<T>, predicate: F) -> Result<Vec<T>>
    where
        T: Element,
        F: Fn(&T) -> bool + Send + Sync,
    {
        let min_len = self.min_len;
        self.run(move |parallel| {
            if parallel {
                items
                    .into_par_iter()
                    .with_min_len(min_len)
                    .filter(|x| predicate(x))
                    .collect()
            } else {
                items.into_iter().filter(|x| predicate(x)).collect()
            }
        })
    }

    pub fn map<T, U, F>(&self, items: Vec<T>, selector: F) -> Result<Vec<U>>
    where
        T: Element,
        U: Element,
        F: Fn(T) -> U + Send + Sync,
    {
        let min_len = self.min_len;
        self.run(move |parallel| {
            if parallel {
                items
                    .into_par_iter()
                    .with_min_len(min_len)
                    .map(|x| selector(x))
                    .collect()
            } else {
                items.into_iter().map(selector).collect()
            }
        })
    }

    pub fn flat_map<T, U, I, F>(&self, items: Vec<T>, selector: F) -> Result<Vec<U>>
    where
        T: Element,
        U: Element,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync,
    {
        let min_len = self.min_len;
        self.run(move |parallel| {
            if parallel {
                items
                    .into_par_iter()
                    .with_min_len(min_len)
                    .flat_map_iter(|x| selector(x))
                    .collect()
            } else {
                items.into_iter().flat_map(selector).collect()
            }
        })
    }

    /// Drop repeated values. Inline keeps first-seen order; on threads each
    /// worker dedups its split and the sets are merged, so order is
    /// unspecified.
    pub fn distinct<T>(&self, items: Vec<T>) -> Result<Vec<T>>
    where
        T: Element + Eq + Hash + Clone,
    {
        let min_len = self.min_len;
        self.run(move |parallel| {
            if parallel {
                items
                    .into_par_iter()
                    .with_min_len(min_len)
                    .fold(HashSet::new, |mut seen, x| {
                        seen.insert(x);
                        seen
                    })
                    .reduce(HashSet::new, |mut a, b| {
                        a.extend(b);
                        a
                    })
                    .into_iter()
                    .collect()
            } else {
                let mut seen = HashSet::new();
                items.into_iter().filter(|x| seen.insert(x.clone())).collect()
            }
        })
    }

    /// Stable sort; `descending` flips the comparator, not the output.
    pub fn sort<T, F>(&self, mut items: Vec<T>, compare: F, descending: bool) -> Result<Vec<T>>
    where
        T: Element,
        F: Fn(&T, &T) -> Ordering + Send + Sync,
    {
        self.run(move |parallel| {
            let cmp = |a: &T, b: &T| {
                if descending {
                    compare(b, a)
                } else {
                    compare(a, b)
                }
            };
            if parallel {
                items.par_sort_by(cmp);
            } else {
                items.sort_by(cmp);
            }
            items
        })
    }

    /// Dispatch `action` over every item. The first error (or panic) is
    /// returned once the pool stops; work already done is not undone.
    pub fn try_for_each<T, F>(&self, items: Vec<T>, action: F) -> Result<()>
    where
        T: Element,
        F: Fn(T) -> Result<()> + Send + Sync,
    {
        let min_len = self.min_len;
        self.run(move |parallel| {
            if parallel {
                items
                    .into_par_iter()
                    .with_min_len(min_len)
                    .try_for_each(|x| action(x))
            } else {
                items.into_iter().try_for_each(action)
            }
        })?
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::inline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn four() -> WorkerPool {
        WorkerPool::new(Parallelism::bounded(4).unwrap()).unwrap()
    }

    #[test]
    fn sequential_bound_is_inline() {
        let pool = WorkerPool::new(Parallelism::sequential()).unwrap();
        assert!(pool.is_inline());
        assert_eq!(pool.threads(), 1);
        assert_eq!(four().threads(), 4);
    }

    #[test]
    fn filter_and_map_keep_the_multiset() {
        let pool = four().with_batch_size(8);
        let items: Vec<u64> = (0..1000).collect();
        let evens = pool.filter(items, |x| x % 2 == 0).unwrap();
        let doubled = pool.map(evens, |x| x * 2).unwrap();
        let got: HashSet<u64> = doubled.into_iter().collect();
        let want: HashSet<u64> = (0..1000).filter(|x| x % 2 == 0).map(|x| x * 2).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn flat_map_expands_every_item() {
        let out = four()
            .flat_map(vec![1usize, 2, 3], |n| vec![n; n])
            .unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn distinct_keeps_one_of_each() {
        let items: Vec<u32> = (0..1000).map(|x| x % 37).collect();
        let inline = WorkerPool::inline().distinct(items.clone()).unwrap();
        assert_eq!(inline, (0..37).collect::<Vec<_>>());
        let pooled: HashSet<u32> = four()
            .with_batch_size(16)
            .distinct(items)
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(pooled.len(), 37);
    }

    #[test]
    fn sort_is_stable_on_both_pools() {
        let pairs = vec![(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd')];
        for pool in [WorkerPool::inline(), four()] {
            let asc = pool
                .sort(pairs.clone(), |a: &(i32, char), b| a.0.cmp(&b.0), false)
                .unwrap();
            assert_eq!(asc, vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c')]);
            let desc = pool
                .sort(pairs.clone(), |a: &(i32, char), b| a.0.cmp(&b.0), true)
                .unwrap();
            assert_eq!(desc, vec![(1, 'a'), (1, 'c'), (0, 'b'), (0, 'd')]);
        }
    }

    #[test]
    fn try_for_each_surfaces_errors_and_panics() {
        let seen = Mutex::new(Vec::new());
        WorkerPool::inline()
            .try_for_each(vec![1, 2, 3], |x| {
                seen.lock().unwrap().push(x);
                Ok(())
            })
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

        let err = four()
            .try_for_each((0..100).collect::<Vec<i32>>(), |x| {
                if x == 42 {
                    Err(Error::Source("bad item".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::Source(_)));

        let err = four()
            .map(vec![1, 0], |x: i32| 10 / x)
            .unwrap_err();
        assert!(matches!(err, Error::Worker(_)));
    }
}
