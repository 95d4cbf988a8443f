//! In-process page and media sources for engine tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::api::{ApiError, Page, PageRequest, PageSource};
use harvester_core::download::{DownloadError, FetchedFile, MediaSource};
use serde_json::{Value, json};

/// JPEG signature followed by filler.
pub const JPEG_BYTES: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

/// Raw API entry for `id`, served from `https://cdn.test/<id>.jpeg`.
pub fn item(id: &str) -> Value {
    item_with_url(id, &format!("https://cdn.test/{id}.jpeg"))
}

/// Raw API entry with an explicit media URL.
pub fn item_with_url(id: &str, url: &str) -> Value {
    json!({
        "id": id,
        "url": url,
        "width": 1024,
        "height": "1536",
        "nsfwLevel": 1,
        "postId": 77,
        "username": "tester",
        "stats": {"likeCount": 3, "heartCount": 2, "commentCount": 1},
        "meta": {"prompt": "a lighthouse", "steps": 30, "cfgScale": 7, "seed": 42},
        "tags": ["coast", {"name": "night"}],
    })
}

/// Numeric ids `from..=to` as raw entries.
pub fn items(from: u32, to: u32) -> Vec<Value> {
    (from..=to).map(|n| item(&n.to_string())).collect()
}

/// Serves a fixed item list, `limit` entries per page, with offset cursors.
pub struct ScriptedPages {
    items: Vec<Value>,
    requests: Mutex<Vec<Vec<(&'static str, String)>>>,
    fail_with: Option<u16>,
}

impl ScriptedPages {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            requests: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// Every request fails with `status`.
    pub fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::new(Vec::new())
        }
    }

    /// Query parameters of every request so far.
    pub fn requests(&self) -> Vec<Vec<(&'static str, String)>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedPages {
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError> {
        self.requests
            .lock()
            .unwrap()
            .push(request.criteria.query_params(request.limit, request.cursor));

        if let Some(status) = self.fail_with {
            return Err(ApiError::http_status("https://api.test/images", status, None));
        }

        let start: usize = request.cursor.map_or(0, |c| c.parse().unwrap());
        let end = (start + request.limit as usize).min(self.items.len());
        let next = (end < self.items.len()).then(|| end.to_string());
        let body = json!({
            "items": self.items[start.min(end)..end],
            "metadata": {"nextCursor": next},
        });
        Ok(Page::from_json(&body.to_string()).unwrap())
    }
}

/// Writes a fixed body for every URL and tracks concurrency.
pub struct StubMedia {
    body: Vec<u8>,
    delay: Duration,
    failing: HashSet<String>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl StubMedia {
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            delay: Duration::ZERO,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn jpeg() -> Self {
        Self::new(JPEG_BYTES)
    }

    /// Each transfer takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Transfers of `url` answer 503.
    pub fn failing_url(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for StubMedia {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.failing.contains(url) {
            Err(DownloadError::http_status(url, 503))
        } else {
            tokio::fs::write(dest, &self.body)
                .await
                .map(|()| FetchedFile {
                    bytes_written: self.body.len() as u64,
                    head: self.body.iter().take(16).copied().collect(),
                })
                .map_err(|e| DownloadError::io(dest, e))
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
