//! Blocking-to-async bridge.
//!
//! A blocking task pulls the synchronous chain and pushes items through a
//! bounded channel; the consumer sees a `Stream`. The channel bound is the
//! only read-ahead. The producer polls the token and the channel before every
//! pull from the leaf source, so a dropped stream or a cancelled token stops
//! it even while a filter is discarding everything it reads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pipeflow_core::{Error, Result};

use crate::source::{Element, Interrupt};
use crate::terminal::Terminal;

/// Run `pipeline.iter()` on the blocking pool and expose it as a stream.
///
/// The stream ends after the first `Err` item. Cancellation is checked before
/// every item and ends the stream with `Error::Cancelled`.
pub fn offload<T, P>(
    pipeline: P,
    capacity: usize,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<T>>
where
    T: Element,
    P: Terminal<T> + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let kind = pipeline.kind();

    let stop: Interrupt = {
        let cancel = cancel.clone();
        let tx = tx.clone();
        Arc::new(move || cancel.is_cancelled() || tx.is_closed())
    };

    tokio::task::spawn_blocking(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            for item in pipeline.iter_until(stop) {
                if cancel.is_cancelled() {
                    tracing::debug!(kind, "stream cancelled");
                    let _ = tx.blocking_send(Err(Error::Cancelled));
                    return;
                }
                let failed = item.is_err();
                // A send error means the consumer went away.
                if tx.blocking_send(item).is_err() || failed {
                    return;
                }
            }
        }));
        if let Err(payload) = outcome {
            let _ = tx.blocking_send(Err(Error::from_panic(payload)));
        }
    });

    stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::Pipeline;
    use crate::source::from_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counted_naturals(pulls: &Arc<AtomicUsize>) -> Pipeline<u64> {
        let counter = Arc::clone(pulls);
        Pipeline::new(from_fn(move || {
            let counter = Arc::clone(&counter);
            (0u64..).inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }))
    }

    #[tokio::test]
    async fn producer_stops_once_the_consumer_is_gone() {
        let pulls = Arc::new(AtomicUsize::new(0));
        // nothing after 0 matches, so the filter would spin on its own
        let p = counted_naturals(&pulls).filter(|x| *x == 0);
        let token = CancellationToken::new();
        assert_eq!(p.first_async(token.clone()).await.unwrap(), 0);
        token.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = pulls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pulls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn cancel_reaches_a_filter_that_matches_nothing() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let p = counted_naturals(&pulls).filter(|x| *x == u64::MAX);
        let token = CancellationToken::new();
        let mut stream = p.stream(token.clone());

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
    }
}
