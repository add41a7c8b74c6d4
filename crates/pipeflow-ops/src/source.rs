//! Source boundary: anything that can hand out a fresh pull-based pass.
//!
//! Pipelines never copy a source eagerly. Every terminal call asks the source
//! for a new pass, so a source must be restartable.

use std::sync::Arc;

use pipeflow_core::{Error, Result};

/// Bounds shared by every element type that flows through a pipeline.
pub trait Element: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Element for T {}

/// One pass over a sequence. Collaborator failures travel as `Err` items.
pub type RowIter<'a, T> = Box<dyn Iterator<Item = Result<T>> + Send + 'a>;

/// Polled before every pull from a leaf source; `true` ends the pass.
pub type Interrupt = Arc<dyn Fn() -> bool + Send + Sync>;

pub trait Source<T>: Send + Sync {
    /// Start a new pass from the beginning.
    fn rows(&self) -> RowIter<'_, T>;

    /// Like `rows`, but `stop` is polled before every pull from the leaf
    /// source. Once it fires the pass yields `Error::Cancelled` and ends.
    /// Stages built over another source forward `stop` to it.
    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, T>
    where
        T: Element,
    {
        interruptible(self.rows(), stop)
    }
}

/// Check `stop` before each pull from `input`.
pub fn interruptible<'a, T: Element>(
    mut input: RowIter<'a, T>,
    stop: Interrupt,
) -> RowIter<'a, T> {
    let mut tripped = false;
    Box::new(std::iter::from_fn(move || {
        if tripped {
            return None;
        }
        if stop() {
            tripped = true;
            return Some(Err(Error::Cancelled));
        }
        input.next()
    }))
}

impl<T: Element + Clone> Source<T> for Vec<T> {
    fn rows(&self) -> RowIter<'_, T> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

impl<T: Element> Source<T> for Arc<dyn Source<T>> {
    fn rows(&self) -> RowIter<'_, T> {
        (**self).rows()
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        (**self).rows_until(stop)
    }
}

/// Source backed by a closure that builds a new iterator per pass.
pub struct FnSource<F>(F);

pub fn from_fn<F, I>(make: F) -> FnSource<F>
where
    F: Fn() -> I + Send + Sync,
    I: IntoIterator,
{
    FnSource(make)
}

impl<T, F, I> Source<T> for FnSource<F>
where
    T: Element,
    F: Fn() -> I + Send + Sync,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    fn rows(&self) -> RowIter<'_, T> {
        Box::new((self.0)().into_iter().map(Ok))
    }
}

/// Like `FnSource`, for readers whose items can fail mid-stream.
pub struct TryFnSource<F>(F);

pub fn try_from_fn<F, I>(make: F) -> TryFnSource<F>
where
    F: Fn() -> I + Send + Sync,
    I: IntoIterator,
{
    TryFnSource(make)
}

impl<T, F, I> Source<T> for TryFnSource<F>
where
    T: Element,
    F: Fn() -> I + Send + Sync,
    I: IntoIterator<Item = Result<T>>,
    I::IntoIter: Send + 'static,
{
    fn rows(&self) -> RowIter<'_, T> {
        Box::new((self.0)().into_iter())
    }
}
