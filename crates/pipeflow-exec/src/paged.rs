//! Paginated pipeline over a remote-queryable source.
//!
//! Results are pulled one page at a time (`skip(offset).take(page_size)`), so
//! a large or remote result set is never materialized wholesale. A page
//! shorter than `page_size` ends the walk; a full last page costs one more
//! fetch that comes back empty.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use pipeflow_core::{Error, Result};
use pipeflow_ops::{Element, Pipeline, RowIter, Source, Terminal};

use crate::builder::PipelineBuilder;

/// Remote source that can evaluate one `skip`/`take` window per call.
pub trait RemoteQuery<T>: Send + Sync {
    fn fetch_page(&self, skip: usize, take: usize) -> Result<Vec<T>>;
}

/// Deferred-execution capability: the provider evaluates pages, `first` and
/// `count` itself. `first`/`first_or_default`/`count` on a `PagedPipeline`
/// built with `PagedPipeline::deferred`, sync or async, call these instead of
/// walking pages.
#[async_trait]
pub trait SupportsAsyncSingleShot<T>: RemoteQuery<T> {
    fn first(&self) -> Result<Option<T>>;

    fn count(&self) -> Result<usize>;

    async fn fetch_page_async(&self, skip: usize, take: usize) -> Result<Vec<T>>;

    async fn first_async(&self) -> Result<Option<T>>;

    async fn count_async(&self) -> Result<usize>;
}

impl<T: Element + Clone> RemoteQuery<T> for Vec<T> {
    fn fetch_page(&self, skip: usize, take: usize) -> Result<Vec<T>> {
        Ok(self.iter().skip(skip).take(take).cloned().collect())
    }
}

pub struct PagedPipeline<T> {
    query: Arc<dyn RemoteQuery<T>>,
    deferred: Option<Arc<dyn SupportsAsyncSingleShot<T>>>,
    page_size: usize,
    // skip/take composed onto the remote query
    offset: usize,
    limit: Option<usize>,
}

impl<T> Clone for PagedPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            query: Arc::clone(&self.query),
            deferred: self.deferred.clone(),
            page_size: self.page_size,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

fn check_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 {
        return Err(Error::precondition("page size must be greater than zero"));
    }
    Ok(())
}

impl<T: Element> PagedPipeline<T> {
    pub fn new(query: impl RemoteQuery<T> + 'static, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        Ok(Self {
            query: Arc::new(query),
            deferred: None,
            page_size,
            offset: 0,
            limit: None,
        })
    }

    /// Like `new`, for sources with native single-shot evaluation.
    pub fn deferred<S>(source: S, page_size: usize) -> Result<Self>
    where
        S: SupportsAsyncSingleShot<T> + 'static,
    {
        check_page_size(page_size)?;
        let source = Arc::new(source);
        Ok(Self {
            query: source.clone(),
            deferred: Some(source),
            page_size,
            offset: 0,
            limit: None,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        self.page_size = page_size;
        Ok(self)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// Compose `skip(count)` onto the remote query.
    pub fn skip(&self, count: usize) -> Self {
        let mut next = self.clone();
        next.offset = self.offset.saturating_add(count);
        next.limit = self.limit.map(|l| l.saturating_sub(count));
        next
    }

    /// Compose `take(count)` onto the remote query.
    pub fn take(&self, count: usize) -> Self {
        let mut next = self.clone();
        next.limit = Some(self.limit.map_or(count, |l| l.min(count)));
        next
    }

    /// Translate a page request into a window on the remote source. `None`
    /// means the window is exhausted and no fetch is needed.
    fn window(&self, skip: usize, take: usize) -> Option<(usize, usize)> {
        match self.limit {
            Some(limit) if skip >= limit => None,
            Some(limit) => Some((self.offset.saturating_add(skip), take.min(limit - skip))),
            None => Some((self.offset.saturating_add(skip), take)),
        }
    }

    /// Lazy pipeline over the page walk. Downstream operators pull pages one
    /// at a time, so `take` stops the walk early.
    pub fn to_pipeline(&self) -> Pipeline<T> {
        Pipeline::new(self.clone())
    }

    /// Builder over the page walk, for `with_batch_size`/`as_parallel` and
    /// type-changing stages.
    pub fn to_builder(&self) -> PipelineBuilder<T> {
        PipelineBuilder::new(self.clone())
    }

    fn fetch(&self, offset: usize) -> Result<Vec<T>> {
        let Some((skip, take)) = self.window(offset, self.page_size) else {
            return Ok(Vec::new());
        };
        let page = self
            .query
            .fetch_page(skip, take)
            .map_err(|e| remote_failure(skip, e))?;
        tracing::debug!(offset = skip, page_size = take, fetched = page.len(), "page fetched");
        Ok(page)
    }

    async fn fetch_async(&self, offset: usize) -> Result<Vec<T>> {
        let Some((skip, take)) = self.window(offset, self.page_size) else {
            return Ok(Vec::new());
        };
        let page = match &self.deferred {
            Some(native) => native.fetch_page_async(skip, take).await,
            None => {
                let query = Arc::clone(&self.query);
                tokio::task::spawn_blocking(move || query.fetch_page(skip, take))
                    .await
                    .map_err(|e| Error::Worker(e.to_string()))?
            }
        }
        .map_err(|e| remote_failure(skip, e))?;
        tracing::debug!(offset = skip, page_size = take, fetched = page.len(), "page fetched");
        Ok(page)
    }

    /// `count` on the whole query, narrowed to this pipeline's window.
    fn clamp_count(&self, total: usize) -> usize {
        let total = total.saturating_sub(self.offset);
        self.limit.map_or(total, |l| total.min(l))
    }

    fn native_first_blocking(
        &self,
        native: &Arc<dyn SupportsAsyncSingleShot<T>>,
    ) -> Result<Option<T>> {
        match self.window(0, 1) {
            None => Ok(None),
            Some((0, _)) => native.first(),
            Some((skip, take)) => Ok(native.fetch_page(skip, take)?.into_iter().next()),
        }
    }

    async fn native_first(
        &self,
        native: &Arc<dyn SupportsAsyncSingleShot<T>>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.window(0, 1) {
            None => Ok(None),
            Some((0, _)) => native.first_async().await,
            Some((skip, take)) => Ok(native.fetch_page_async(skip, take).await?.into_iter().next()),
        }
    }
}

/// Cancellation and fetch errors stay as they are; anything else a remote
/// source reports becomes `Error::Remote`.
fn remote_failure(offset: usize, e: Error) -> Error {
    match e {
        Error::Cancelled | Error::Remote(_) => e,
        other => Error::Remote(format!("page at offset {offset}: {other}")),
    }
}

/// Pull-side state shared by the sync and async walks.
struct Cursor<T> {
    offset: usize,
    page: std::vec::IntoIter<T>,
    done: bool,
}

impl<T> Cursor<T> {
    fn new() -> Self {
        Self {
            offset: 0,
            page: Vec::new().into_iter(),
            done: false,
        }
    }

    /// Install a freshly fetched page; applies both stop rules.
    fn advance(&mut self, batch: Vec<T>, page_size: usize) {
        if batch.is_empty() {
            self.done = true;
            return;
        }
        if batch.len() < page_size {
            self.done = true;
        }
        self.offset += page_size;
        self.page = batch.into_iter();
    }
}

struct PageIter<'a, T> {
    pipeline: &'a PagedPipeline<T>,
    cursor: Cursor<T>,
}

impl<T: Element> Iterator for PageIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.cursor.page.next() {
                return Some(Ok(item));
            }
            if self.cursor.done {
                return None;
            }
            match self.pipeline.fetch(self.cursor.offset) {
                Ok(batch) => self.cursor.advance(batch, self.pipeline.page_size),
                Err(e) => {
                    self.cursor.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<T: Element> Source<T> for PagedPipeline<T> {
    fn rows(&self) -> RowIter<'_, T> {
        Box::new(PageIter {
            pipeline: self,
            cursor: Cursor::new(),
        })
    }
}

#[async_trait]
impl<T: Element> Terminal<T> for PagedPipeline<T> {
    fn kind(&self) -> &'static str {
        "paged"
    }

    fn iter(&self) -> RowIter<'_, T> {
        self.rows()
    }

    fn first(&self) -> Result<T> {
        match &self.deferred {
            Some(native) => self.native_first_blocking(native)?.ok_or(Error::EmptySequence),
            None => self.iter().next().unwrap_or(Err(Error::EmptySequence)),
        }
    }

    fn first_or_default(&self) -> Result<T>
    where
        T: Default,
    {
        match &self.deferred {
            Some(native) => Ok(self.native_first_blocking(native)?.unwrap_or_default()),
            None => self.iter().next().unwrap_or_else(|| Ok(T::default())),
        }
    }

    fn count(&self) -> Result<usize> {
        match &self.deferred {
            Some(native) => Ok(self.clamp_count(native.count()?)),
            None => {
                let mut n = 0;
                for item in self.iter() {
                    item?;
                    n += 1;
                }
                Ok(n)
            }
        }
    }

    /// One outstanding fetch at a time, no read-ahead. Cancellation is checked
    /// before every page.
    fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>> {
        let state = (self.clone(), Cursor::new(), cancel);
        stream::unfold(state, |(pipeline, mut cursor, cancel)| async move {
            loop {
                if let Some(item) = cursor.page.next() {
                    return Some((Ok(item), (pipeline, cursor, cancel)));
                }
                if cursor.done {
                    return None;
                }
                if cancel.is_cancelled() {
                    tracing::debug!(offset = cursor.offset, "paged stream cancelled");
                    cursor.done = true;
                    return Some((Err(Error::Cancelled), (pipeline, cursor, cancel)));
                }
                match pipeline.fetch_async(cursor.offset).await {
                    Ok(batch) => cursor.advance(batch, pipeline.page_size),
                    Err(e) => {
                        cursor.done = true;
                        return Some((Err(e), (pipeline, cursor, cancel)));
                    }
                }
            }
        })
        .boxed()
    }

    async fn first_async(&self, cancel: CancellationToken) -> Result<T> {
        match &self.deferred {
            Some(native) => self
                .native_first(native, &cancel)
                .await?
                .ok_or(Error::EmptySequence),
            None => self
                .stream(cancel)
                .next()
                .await
                .unwrap_or(Err(Error::EmptySequence)),
        }
    }

    async fn first_or_default_async(&self, cancel: CancellationToken) -> Result<T>
    where
        T: Default,
    {
        match &self.deferred {
            Some(native) => Ok(self
                .native_first(native, &cancel)
                .await?
                .unwrap_or_default()),
            None => self
                .stream(cancel)
                .next()
                .await
                .unwrap_or_else(|| Ok(T::default())),
        }
    }

    async fn count_async(&self, cancel: CancellationToken) -> Result<usize> {
        match &self.deferred {
            Some(native) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                Ok(self.clamp_count(native.count_async().await?))
            }
            None => {
                self.stream(cancel)
                    .try_fold(0usize, |n, _| async move { Ok(n + 1) })
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory remote that counts round trips.
    #[derive(Default)]
    struct CountingRemote {
        items: Vec<u32>,
        fetches: AtomicUsize,
        native_calls: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl CountingRemote {
        fn with_len(n: u32) -> Arc<Self> {
            Arc::new(Self {
                items: (0..n).collect(),
                ..Self::default()
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl RemoteQuery<u32> for Arc<CountingRemote> {
        fn fetch_page(&self, skip: usize, take: usize) -> Result<Vec<u32>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(skip) {
                return Err(Error::Source("connection reset".into()));
            }
            self.items.fetch_page(skip, take)
        }
    }

    #[async_trait]
    impl SupportsAsyncSingleShot<u32> for Arc<CountingRemote> {
        fn first(&self) -> Result<Option<u32>> {
            self.native_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.first().copied())
        }

        fn count(&self) -> Result<usize> {
            self.native_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.len())
        }

        async fn fetch_page_async(&self, skip: usize, take: usize) -> Result<Vec<u32>> {
            self.fetch_page(skip, take)
        }

        async fn first_async(&self) -> Result<Option<u32>> {
            self.native_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.first().copied())
        }

        async fn count_async(&self) -> Result<usize> {
            self.native_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.len())
        }
    }

    const K: usize = 4;

    #[test]
    fn exact_multiple_costs_one_extra_empty_fetch() {
        let remote = CountingRemote::with_len(K as u32);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        assert_eq!(paged.to_list().unwrap().len(), K);
        assert_eq!(remote.fetches(), 2);
    }

    #[test]
    fn short_page_stops_without_extra_fetch() {
        let remote = CountingRemote::with_len(K as u32 - 1);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        assert_eq!(paged.count().unwrap(), K - 1);
        assert_eq!(remote.fetches(), 1);
    }

    #[test]
    fn full_then_short_page() {
        let remote = CountingRemote::with_len(K as u32 + 1);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        let items = paged.to_list().unwrap();
        assert_eq!(items, (0..=K as u32).collect::<Vec<_>>());
        assert_eq!(remote.fetches(), 2);
    }

    #[tokio::test]
    async fn async_walk_has_the_same_fetch_pattern() {
        for (len, fetches) in [(K, 2), (K - 1, 1), (K + 1, 2)] {
            let remote = CountingRemote::with_len(len as u32);
            let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
            let items = paged.to_list_async(CancellationToken::new()).await.unwrap();
            assert_eq!(items.len(), len);
            assert_eq!(remote.fetches(), fetches, "len {len}");
        }
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = PagedPipeline::new(vec![1u32], 0).err();
        assert!(matches!(err, Some(Error::Precondition(_))));
        let paged = PagedPipeline::new(vec![1u32], 10).unwrap();
        assert!(paged.with_page_size(0).is_err());
    }

    #[test]
    fn fetch_failure_aborts_the_walk() {
        let remote = Arc::new(CountingRemote {
            items: (0..10).collect(),
            fail_at: Some(K),
            ..CountingRemote::default()
        });
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        let items: Vec<_> = paged.iter().collect();
        assert_eq!(items.len(), K + 1);
        assert!(matches!(items[K], Err(Error::Remote(_))));
        assert_eq!(remote.fetches(), 2);
        assert!(!paged.execute().success);
    }

    #[tokio::test]
    async fn cancellation_is_checked_before_each_page() {
        let remote = CountingRemote::with_len(10);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        let token = CancellationToken::new();
        let mut stream = paged.stream(token.clone());
        for _ in 0..K {
            assert!(stream.next().await.unwrap().is_ok());
        }
        token.cancel();
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
        assert_eq!(remote.fetches(), 1);
    }

    #[test]
    fn skip_and_take_compose_onto_the_query() {
        let remote = CountingRemote::with_len(20);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        let window = paged.skip(3).take(K);
        assert_eq!(window.to_list().unwrap(), vec![3, 4, 5, 6]);
        // the window ends on a full page; the follow-up request never leaves
        assert_eq!(remote.fetches(), 1);
        assert_eq!(paged.skip(18).take(5).count().unwrap(), 2);
    }

    #[tokio::test]
    async fn deferred_sources_answer_first_and_count_natively() {
        let remote = CountingRemote::with_len(9);
        let paged = PagedPipeline::deferred(Arc::clone(&remote), K).unwrap();
        assert!(paged.is_deferred());
        let token = CancellationToken::new();

        assert_eq!(paged.first_async(token.clone()).await.unwrap(), 0);
        assert_eq!(paged.count_async(token.clone()).await.unwrap(), 9);
        assert_eq!(paged.skip(2).take(3).count_async(token.clone()).await.unwrap(), 3);
        assert_eq!(remote.native_calls.load(Ordering::SeqCst), 3);
        assert_eq!(remote.fetches(), 0);

        assert_eq!(paged.skip(5).first_async(token.clone()).await.unwrap(), 5);
        assert_eq!(paged.skip(50).first_or_default_async(token).await.unwrap(), 0);
        assert_eq!(remote.fetches(), 2);
    }

    #[test]
    fn deferred_sync_terminals_skip_the_page_walk() {
        let remote = CountingRemote::with_len(100);
        let paged = PagedPipeline::deferred(Arc::clone(&remote), 10).unwrap();
        assert_eq!(paged.count().unwrap(), 100);
        assert_eq!(paged.first().unwrap(), 0);
        assert_eq!(paged.take(5).count().unwrap(), 5);
        assert_eq!(paged.skip(98).count().unwrap(), 2);
        assert_eq!(remote.native_calls.load(Ordering::SeqCst), 4);
        assert_eq!(remote.fetches(), 0);

        // a shifted window reads a single one-item page
        assert_eq!(paged.skip(7).first().unwrap(), 7);
        assert_eq!(remote.fetches(), 1);
        assert_eq!(paged.skip(500).first_or_default().unwrap(), 0);
        assert_eq!(remote.fetches(), 2);
    }

    #[test]
    fn downstream_operators_pull_pages_incrementally() {
        let remote = CountingRemote::with_len(100);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        let evens = paged.to_pipeline().filter(|x| x % 2 == 0).take(3);
        assert_eq!(evens.to_list().unwrap(), vec![0, 2, 4]);
        // 0..4 gives two evens; the third comes from the second page
        assert_eq!(remote.fetches(), 2);

        let doubled = paged
            .to_builder()
            .take(5)
            .map(|x| x * 2)
            .build()
            .to_list()
            .unwrap();
        assert_eq!(doubled, vec![0, 2, 4, 6, 8]);
        assert_eq!(remote.fetches(), 4);
    }

    #[test]
    fn huge_skips_saturate_instead_of_overflowing() {
        let paged = PagedPipeline::new((0..10u32).collect::<Vec<_>>(), K).unwrap();
        let far = paged.skip(usize::MAX).skip(usize::MAX);
        assert!(far.to_list().unwrap().is_empty());
        assert_eq!(paged.skip(usize::MAX).take(3).count().unwrap(), 0);
    }

    #[tokio::test]
    async fn plain_sources_fall_back_to_enumeration() {
        let remote = CountingRemote::with_len(9);
        let paged = PagedPipeline::new(Arc::clone(&remote), K).unwrap();
        let token = CancellationToken::new();
        assert_eq!(paged.first_async(token.clone()).await.unwrap(), 0);
        assert_eq!(paged.count_async(token).await.unwrap(), 9);
        assert_eq!(remote.native_calls.load(Ordering::SeqCst), 0);
        assert_eq!(remote.fetches(), 1 + 3);
    }

    #[tokio::test]
    async fn empty_remote_first_fails() {
        let paged = PagedPipeline::new(Vec::<u32>::new(), K).unwrap();
        assert!(matches!(paged.first(), Err(Error::EmptySequence)));
        assert!(matches!(
            paged.first_async(CancellationToken::new()).await,
            Err(Error::EmptySequence)
        ));
        assert_eq!(paged.first_or_default().unwrap(), 0);
    }
}
