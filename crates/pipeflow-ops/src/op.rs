//! Tagged operator list.
//!
//! Same-type operators are stored as `Op` values and replayed over a fresh
//! pass at terminal time. Nothing here touches a source until `apply` is
//! driven by a terminal pull.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use pipeflow_core::Result;

use crate::source::{Element, RowIter};

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Per-pass "first time seen?" test. A fresh one is built for every pass so
/// dedup state never leaks between terminal calls.
pub type SeenTest<T> = Box<dyn FnMut(&T) -> bool + Send>;
pub type SeenFactory<T> = Arc<dyn Fn() -> SeenTest<T> + Send + Sync>;

pub enum Op<T> {
    Filter(Predicate<T>),
    Take(usize),
    Skip(usize),
    /// Keeps the first occurrence of each value, in encounter order.
    Distinct(SeenFactory<T>),
    /// Stable sort; equal keys keep their input order in both directions.
    Sort {
        compare: Comparator<T>,
        descending: bool,
    },
}

impl<T> Clone for Op<T> {
    fn clone(&self) -> Self {
        match self {
            Op::Filter(p) => Op::Filter(Arc::clone(p)),
            Op::Take(n) => Op::Take(*n),
            Op::Skip(n) => Op::Skip(*n),
            Op::Distinct(f) => Op::Distinct(Arc::clone(f)),
            Op::Sort {
                compare,
                descending,
            } => Op::Sort {
                compare: Arc::clone(compare),
                descending: *descending,
            },
        }
    }
}

impl<T> fmt::Debug for Op<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Take(n) => write!(f, "Take({n})"),
            Op::Skip(n) => write!(f, "Skip({n})"),
            Op::Sort { descending, .. } => write!(f, "Sort {{ descending: {descending} }}"),
            other => f.write_str(other.name()),
        }
    }
}

impl<T> Op<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Filter(_) => "filter",
            Op::Take(_) => "take",
            Op::Skip(_) => "skip",
            Op::Distinct(_) => "distinct",
            Op::Sort { .. } => "sort",
        }
    }
}

impl<T: Element> Op<T> {
    pub fn filter<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Op::Filter(Arc::new(predicate))
    }

    pub fn distinct() -> Self
    where
        T: Eq + Hash + Clone,
    {
        Op::Distinct(Arc::new(|| {
            let mut seen = HashSet::new();
            Box::new(move |item: &T| seen.insert(item.clone()))
        }))
    }

    pub fn sort_by_key<K, F>(key: F, descending: bool) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Op::Sort {
            compare: Arc::new(move |a, b| key(a).cmp(&key(b))),
            descending,
        }
    }

    /// Wrap `input` with this operator. Errors pass through untouched and do
    /// not count towards `take`/`skip`.
    pub fn apply<'a>(&self, input: RowIter<'a, T>) -> RowIter<'a, T> {
        match self {
            Op::Filter(pred) => {
                let pred = Arc::clone(pred);
                Box::new(input.filter(move |item| match item {
                    Ok(v) => pred(v),
                    Err(_) => true,
                }))
            }
            Op::Take(n) => take(input, *n),
            Op::Skip(n) => {
                let mut left = *n;
                Box::new(input.filter(move |item| match item {
                    Ok(_) if left > 0 => {
                        left -= 1;
                        false
                    }
                    _ => true,
                }))
            }
            Op::Distinct(factory) => {
                let mut first_seen = factory();
                Box::new(input.filter(move |item| match item {
                    Ok(v) => first_seen(v),
                    Err(_) => true,
                }))
            }
            Op::Sort {
                compare,
                descending,
            } => sorted(input, Arc::clone(compare), *descending),
        }
    }
}

/// Fold `ops` over `input` in order.
pub fn apply_all<'a, 'o, T: Element>(
    ops: impl IntoIterator<Item = &'o Op<T>>,
    input: RowIter<'a, T>,
) -> RowIter<'a, T> {
    ops.into_iter().fold(input, |acc, op| op.apply(acc))
}

/// Stops pulling as soon as `n` items went out, so infinite sources are safe.
fn take<'a, T: Element>(mut input: RowIter<'a, T>, n: usize) -> RowIter<'a, T> {
    let mut left = n;
    Box::new(std::iter::from_fn(move || {
        if left == 0 {
            return None;
        }
        let next = input.next()?;
        if next.is_ok() {
            left -= 1;
        }
        Some(next)
    }))
}

/// Group consecutive items into chunks of `size`; the last chunk may be
/// shorter. Errors pass through in place without breaking the current chunk.
/// `size` must be non-zero; callers check it before building the stage.
pub fn chunked<'a, T: Element>(input: RowIter<'a, T>, size: usize) -> RowIter<'a, Vec<T>> {
    let mut input = input.fuse();
    let mut pending: Vec<T> = Vec::with_capacity(size);
    Box::new(std::iter::from_fn(move || loop {
        match input.next() {
            Some(Ok(item)) => {
                pending.push(item);
                if pending.len() >= size {
                    return Some(Ok(std::mem::take(&mut pending)));
                }
            }
            Some(Err(e)) => return Some(Err(e)),
            None if pending.is_empty() => return None,
            None => return Some(Ok(std::mem::take(&mut pending))),
        }
    }))
}

/// Sorting needs the whole input; collection is deferred to the first pull.
fn sorted<'a, T: Element>(
    input: RowIter<'a, T>,
    compare: Comparator<T>,
    descending: bool,
) -> RowIter<'a, T> {
    let mut pending = Some(input);
    let mut drained: Option<RowIter<'static, T>> = None;
    Box::new(std::iter::from_fn(move || {
        if let Some(input) = pending.take() {
            drained = Some(match input.collect::<Result<Vec<T>>>() {
                Ok(mut items) => {
                    if descending {
                        items.sort_by(|a, b| compare(b, a));
                    } else {
                        items.sort_by(|a, b| compare(a, b));
                    }
                    Box::new(items.into_iter().map(Ok))
                }
                Err(e) => Box::new(std::iter::once(Err(e))),
            });
        }
        drained.as_mut()?.next()
    }))
}
