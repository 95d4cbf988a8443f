//! Cursor pagination over a [`PageSource`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tracing::{debug, info, instrument, warn};

use super::client::{PageRequest, PageSource};
use super::error::ApiError;
use super::filter::{FilterCriteria, MAX_PAGE_SIZE};
use super::item::Page;
use crate::download::{RateLimiter, RetryPolicy, with_retry};

/// Walks the remote API one cursor at a time.
///
/// Each call to [`Paginator::next_page`] waits out the minimum page delay,
/// fetches with retry, and advances the cursor. The sequence ends when a
/// page carries no next cursor, when a page is empty, or after a terminal
/// error.
pub struct Paginator {
    source: Arc<dyn PageSource>,
    criteria: FilterCriteria,
    page_size: u32,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cursor: Option<String>,
    exhausted: bool,
    pages_fetched: u64,
    retries: u64,
}

impl std::fmt::Debug for Paginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("criteria", &self.criteria)
            .field("page_size", &self.page_size)
            .field("cursor", &self.cursor)
            .field("exhausted", &self.exhausted)
            .field("pages_fetched", &self.pages_fetched)
            .finish_non_exhaustive()
    }
}

impl Paginator {
    /// Creates a paginator starting at the first page.
    ///
    /// `page_size` is clamped to `1..=200`.
    #[must_use]
    pub fn new(
        source: Arc<dyn PageSource>,
        criteria: FilterCriteria,
        page_size: u32,
        page_delay: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            criteria,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            limiter: RateLimiter::new(page_delay),
            retry,
            cursor: None,
            exhausted: false,
            pages_fetched: 0,
            retries: 0,
        }
    }

    /// True once the sequence has ended.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pages successfully fetched so far.
    #[must_use]
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Extra attempts spent on page fetches.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Cursor the next request will send.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Fetches the next page.
    ///
    /// `wanted` caps the requested page size (e.g. the remaining target).
    /// Returns `Ok(None)` once the sequence has ended.
    ///
    /// # Errors
    ///
    /// Returns the last [`ApiError`] once retries are exhausted or the failure
    /// is permanent. The paginator is exhausted afterwards.
    #[instrument(skip(self), fields(page = self.pages_fetched + 1))]
    pub async fn next_page(&mut self, wanted: Option<u64>) -> Result<Option<Page>, ApiError> {
        if self.exhausted {
            return Ok(None);
        }

        let limit = wanted
            .map_or(self.page_size, |w| {
                u32::try_from(w.min(u64::from(self.page_size))).unwrap_or(self.page_size)
            })
            .max(1);

        self.limiter.acquire().await;

        let source = &self.source;
        let criteria = &self.criteria;
        let cursor = self.cursor.as_deref();
        let outcome = with_retry(&self.retry, "page", move |_attempt| {
            source.fetch_page(PageRequest {
                criteria,
                limit,
                cursor,
            })
        })
        .await;
        self.retries += u64::from(outcome.attempts.saturating_sub(1));

        let page = match outcome.result {
            Ok(page) => page,
            Err(error) => {
                warn!(error = %error, attempts = outcome.attempts, "page fetch failed");
                self.exhausted = true;
                return Err(error);
            }
        };
        self.pages_fetched += 1;

        if page.is_empty() {
            info!("empty page, pagination complete");
            self.exhausted = true;
            return Ok(None);
        }

        match page.next_cursor.as_deref() {
            None => {
                info!(pages = self.pages_fetched, "no next cursor, pagination complete");
                self.exhausted = true;
            }
            Some(next) if Some(next) == self.cursor.as_deref() => {
                warn!(cursor = next, "server repeated the cursor, stopping");
                self.exhausted = true;
            }
            Some(next) => {
                debug!(cursor = next, "advancing cursor");
                self.cursor = Some(next.to_string());
            }
        }

        Ok(Some(page))
    }

    /// Converts the paginator into a lazy stream of pages.
    ///
    /// A terminal error is yielded once, then the stream ends.
    pub fn into_stream(self) -> impl Stream<Item = Result<Page, ApiError>> {
        futures_util::stream::unfold(self, |mut paginator| async move {
            match paginator.next_page(None).await {
                Ok(Some(page)) => Some((Ok(page), paginator)),
                Ok(None) => None,
                Err(error) => Some((Err(error), paginator)),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::api::ItemDescriptor;

    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Page, ApiError>>>,
        requests: Mutex<Vec<(u32, Option<String>)>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Page, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.limit, request.cursor.map(str::to_string)));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    fn page(ids: &[u64], next: Option<&str>) -> Page {
        Page {
            items: ids
                .iter()
                .map(|id| ItemDescriptor::from_value(json!({"id": id, "url": "https://cdn/x"})).unwrap())
                .collect(),
            next_cursor: next.map(str::to_string),
            malformed: 0,
        }
    }

    fn paginator(source: Arc<ScriptedSource>) -> Paginator {
        Paginator::new(
            source,
            FilterCriteria::default(),
            100,
            Duration::ZERO,
            RetryPolicy::with_max_attempts(3).with_base_delay(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_follows_cursors_until_absent() {
        let source = ScriptedSource::new(vec![
            Ok(page(&[1, 2], Some("c1"))),
            Ok(page(&[3], Some("c2"))),
            Ok(page(&[4], None)),
        ]);
        let mut paginator = paginator(Arc::clone(&source));

        let mut ids = Vec::new();
        while let Some(page) = paginator.next_page(None).await.unwrap() {
            ids.extend(page.items.into_iter().map(|i| i.id));
        }

        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(paginator.pages_fetched(), 3);
        let requests = source.requests.lock().unwrap().clone();
        assert_eq!(
            requests.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>(),
            vec![None, Some("c1".to_string()), Some("c2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_page_ends_sequence() {
        let source = ScriptedSource::new(vec![Ok(page(&[], Some("c1")))]);
        let mut paginator = paginator(source);
        assert!(paginator.next_page(None).await.unwrap().is_none());
        assert!(paginator.is_exhausted());
    }

    #[tokio::test]
    async fn test_transient_errors_retry_same_page() {
        let source = ScriptedSource::new(vec![
            Err(ApiError::http_status("u", 503, None)),
            Err(ApiError::Timeout { url: "u".into() }),
            Ok(page(&[1], None)),
        ]);
        let mut paginator = paginator(Arc::clone(&source));

        let first = paginator.next_page(None).await.unwrap().unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(paginator.retries(), 2);
        let requests = source.requests.lock().unwrap().clone();
        assert!(requests.iter().all(|(_, cursor)| cursor.is_none()));
    }

    #[tokio::test]
    async fn test_terminal_error_surfaces_and_exhausts() {
        let source = ScriptedSource::new(vec![Err(ApiError::http_status("u", 400, None))]);
        let mut paginator = paginator(source);

        assert!(paginator.next_page(None).await.is_err());
        assert!(paginator.is_exhausted());
        assert!(paginator.next_page(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_limit_respects_wanted_and_page_size() {
        let source = ScriptedSource::new(vec![Ok(page(&[1], Some("a"))), Ok(page(&[2], None))]);
        let mut paginator = paginator(Arc::clone(&source));

        paginator.next_page(Some(7)).await.unwrap();
        paginator.next_page(Some(10_000)).await.unwrap();

        let limits: Vec<u32> = source.requests.lock().unwrap().iter().map(|(l, _)| *l).collect();
        assert_eq!(limits, vec![7, 100]);
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops() {
        let source = ScriptedSource::new(vec![
            Ok(page(&[1], Some("same"))),
            Ok(page(&[2], Some("same"))),
            Ok(page(&[3], Some("other"))),
        ]);
        let mut paginator = paginator(source);
        assert!(paginator.next_page(None).await.unwrap().is_some());
        assert!(paginator.next_page(None).await.unwrap().is_some());
        assert!(paginator.next_page(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_stream_yields_pages() {
        let source = ScriptedSource::new(vec![Ok(page(&[1], Some("a"))), Ok(page(&[2, 3], None))]);
        let pages: Vec<_> = paginator(source).into_stream().collect().await;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].as_ref().unwrap().items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_delay_is_enforced() {
        let source = ScriptedSource::new(vec![Ok(page(&[1], Some("a"))), Ok(page(&[2], None))]);
        let mut paginator = Paginator::new(
            source,
            FilterCriteria::default(),
            100,
            Duration::from_millis(500),
            RetryPolicy::default(),
        );
        let start = tokio::time::Instant::now();
        paginator.next_page(None).await.unwrap();
        paginator.next_page(None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
