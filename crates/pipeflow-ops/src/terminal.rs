//! Terminal accessors shared by every executable pipeline form.
//!
//! Implementors supply a synchronous pass (`iter`) and an async pass
//! (`stream`). The buffered, counting, and push-style accessors are derived
//! from those two and can be overridden where a form has a cheaper native
//! path (the paginated pipeline does this for `first`/`count`).

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use pipeflow_core::{Error, Result};

use crate::sink::Sink;
use crate::source::{interruptible, Element, Interrupt, RowIter};

/// Outcome of a buffered `execute` call. Failures are reported here instead
/// of being returned as `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub errors: Vec<String>,
    /// Items pulled before completion or failure.
    pub processed_count: usize,
    pub failed_count: usize,
    pub elapsed: Duration,
}

impl<T> PipelineResult<T> {
    pub fn success(data: Vec<T>, elapsed: Duration) -> Self {
        Self {
            success: true,
            processed_count: data.len(),
            data,
            errors: Vec::new(),
            failed_count: 0,
            elapsed,
        }
    }

    pub fn failure(errors: Vec<String>, processed_count: usize, elapsed: Duration) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            failed_count: errors.len(),
            errors,
            processed_count,
            elapsed,
        }
    }

    fn from_outcome(data: Vec<T>, outcome: Result<()>, elapsed: Duration) -> Self {
        match outcome {
            Ok(()) => Self::success(data, elapsed),
            Err(e) => Self::failure(vec![e.to_string()], data.len(), elapsed),
        }
    }

    pub fn into_result(self) -> Result<Vec<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Error::Source(self.errors.join("; ")))
        }
    }
}

#[async_trait]
pub trait Terminal<T: Element>: Send + Sync {
    /// Short label used in log events.
    fn kind(&self) -> &'static str;

    /// Pull-style pass. Each call re-runs the whole chain from the source;
    /// errors surface at the item where they happened.
    fn iter(&self) -> RowIter<'_, T>;

    /// `iter` with `stop` polled before each pull from the underlying
    /// source. Forms whose chain can drop items (filters, skips) override
    /// this so the check reaches the leaf source.
    fn iter_until(&self, stop: Interrupt) -> RowIter<'_, T> {
        interruptible(self.iter(), stop)
    }

    /// Async pull. Must be called inside a Tokio runtime. Cancellation is
    /// checked between items (or pages) and ends the stream with
    /// `Error::Cancelled`.
    fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>>;

    /// Buffered evaluation. Errors and panics raised while pulling become a
    /// failed `PipelineResult`.
    fn execute(&self) -> PipelineResult<T> {
        let started = Instant::now();
        let mut data = Vec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            for item in self.iter() {
                data.push(item?);
            }
            Ok(())
        }))
        .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
        let result = PipelineResult::from_outcome(data, outcome, started.elapsed());
        tracing::debug!(
            kind = self.kind(),
            success = result.success,
            processed = result.processed_count,
            "execute finished"
        );
        result
    }

    fn to_list(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    fn to_array(&self) -> Result<Box<[T]>> {
        self.to_list().map(Vec::into_boxed_slice)
    }

    fn first(&self) -> Result<T> {
        self.iter().next().unwrap_or(Err(Error::EmptySequence))
    }

    fn first_or_default(&self) -> Result<T>
    where
        T: Default,
    {
        self.iter().next().unwrap_or_else(|| Ok(T::default()))
    }

    fn count(&self) -> Result<usize> {
        let mut n = 0;
        for item in self.iter() {
            item?;
            n += 1;
        }
        Ok(n)
    }

    fn for_each<F>(&self, mut action: F) -> Result<()>
    where
        F: FnMut(T),
        Self: Sized,
    {
        for item in self.iter() {
            action(item?);
        }
        Ok(())
    }

    fn try_for_each<F>(&self, mut action: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
        Self: Sized,
    {
        for item in self.iter() {
            action(item?)?;
        }
        Ok(())
    }

    /// Drain into a collaborator sink. An empty pass still calls `finish`.
    fn write_to<S>(&self, sink: &mut S) -> Result<usize>
    where
        S: Sink<T> + ?Sized,
        Self: Sized,
    {
        let mut written = 0;
        for item in self.iter() {
            sink.write(item?)?;
            written += 1;
        }
        sink.finish()?;
        Ok(written)
    }

    async fn execute_async(&self, cancel: CancellationToken) -> PipelineResult<T> {
        let started = Instant::now();
        let mut data = Vec::new();
        let mut outcome = Ok(());
        let mut stream = self.stream(cancel);
        while let Some(item) = stream.next().await {
            match item {
                Ok(v) => data.push(v),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        PipelineResult::from_outcome(data, outcome, started.elapsed())
    }

    async fn to_list_async(&self, cancel: CancellationToken) -> Result<Vec<T>> {
        self.stream(cancel).try_collect().await
    }

    async fn to_array_async(&self, cancel: CancellationToken) -> Result<Box<[T]>> {
        self.to_list_async(cancel)
            .await
            .map(Vec::into_boxed_slice)
    }

    async fn first_async(&self, cancel: CancellationToken) -> Result<T> {
        let mut stream = self.stream(cancel);
        stream.next().await.unwrap_or(Err(Error::EmptySequence))
    }

    async fn first_or_default_async(&self, cancel: CancellationToken) -> Result<T>
    where
        T: Default,
    {
        let mut stream = self.stream(cancel);
        stream.next().await.unwrap_or_else(|| Ok(T::default()))
    }

    async fn count_async(&self, cancel: CancellationToken) -> Result<usize> {
        self.stream(cancel)
            .try_fold(0usize, |n, _| async move { Ok(n + 1) })
            .await
    }

    /// Sequential async push: each action is awaited before the next item is
    /// pulled. Cancellation is checked before every item.
    async fn for_each_async<F, Fut>(&self, mut action: F, cancel: CancellationToken) -> Result<()>
    where
        F: FnMut(T) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
        Self: Sized,
    {
        let mut stream = self.stream(cancel.clone());
        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            action(item?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::Pipeline;
    use crate::sink::CollectSink;
    use crate::source::{from_fn, try_from_fn};

    #[test]
    fn execute_reports_source_errors_as_failures() {
        let p = Pipeline::new(try_from_fn(|| {
            vec![Ok(1), Ok(2), Err(Error::Source("truncated input".into()))]
        }));
        let result = p.execute();
        assert!(!result.success);
        assert_eq!(result.processed_count, 2);
        assert_eq!(result.failed_count, 1);
        assert!(result.errors[0].contains("truncated input"));
        assert!(result.data.is_empty());
    }

    #[test]
    fn execute_catches_panicking_operators() {
        let p = Pipeline::new(vec![1, 2, 0]).map(|x| 10 / x);
        let result = p.execute();
        assert!(!result.success);
        assert_eq!(result.processed_count, 2);
    }

    #[test]
    fn execute_success_carries_data() {
        let result = Pipeline::new(vec![3, 1, 2]).sort_by_key(|x| *x).execute();
        assert!(result.success);
        assert_eq!(result.processed_count, 3);
        assert_eq!(result.clone().into_result().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn writers_tolerate_empty_sequences() {
        let mut sink = CollectSink::new();
        let written = Pipeline::new(Vec::<i32>::new())
            .write_to(&mut sink)
            .unwrap();
        assert_eq!(written, 0);
        assert!(sink.finished);
        assert!(sink.items.is_empty());
    }

    #[test]
    fn try_for_each_stops_on_first_error() {
        let mut seen = Vec::new();
        let err = Pipeline::new(vec![1, 2, 3, 4])
            .try_for_each(|x| {
                if x == 3 {
                    return Err(Error::Source("stop".into()));
                }
                seen.push(x);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Source(_)));
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn async_terminals_match_sync_ones() {
        let p = Pipeline::new((1..=10).collect::<Vec<i64>>()).filter(|x| x % 2 == 0);
        let token = CancellationToken::new();
        assert_eq!(p.to_list_async(token.clone()).await.unwrap(), p.to_list().unwrap());
        assert_eq!(p.count_async(token.clone()).await.unwrap(), 5);
        assert_eq!(p.first_async(token.clone()).await.unwrap(), 2);
        assert_eq!(p.to_array_async(token.clone()).await.unwrap().len(), 5);
        let empty = p.skip(100);
        assert!(matches!(
            empty.first_async(token.clone()).await,
            Err(Error::EmptySequence)
        ));
        assert_eq!(empty.first_or_default_async(token.clone()).await.unwrap(), 0);
        let result = p.execute_async(token).await;
        assert!(result.success);
        assert_eq!(result.data, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn cancelled_token_ends_async_terminals() {
        let token = CancellationToken::new();
        token.cancel();
        let p = Pipeline::new(from_fn(|| 0u32..));
        assert!(matches!(
            p.to_list_async(token.clone()).await,
            Err(Error::Cancelled)
        ));
        let result = p.execute_async(token).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn for_each_async_awaits_each_item_in_order() {
        let token = CancellationToken::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        Pipeline::new(vec!["a", "b", "c"])
            .for_each_async(
                move |s| {
                    let sink = std::sync::Arc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(s);
                        Ok::<(), Error>(())
                    }
                },
                token,
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn stream_surfaces_errors_at_the_failing_item() {
        let p = Pipeline::new(try_from_fn(|| {
            vec![Ok(1), Err(Error::Source("bad".into())), Ok(3)]
        }));
        let items: Vec<_> = p.stream(CancellationToken::new()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
