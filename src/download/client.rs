//! HTTP client for streaming media files to disk.
//!
//! [`HttpClient`] implements [`MediaSource`], the seam the worker pool uses to
//! fetch one item. Bodies are streamed straight to a caller-chosen path; the
//! first [`SNIFF_LEN`] bytes are kept aside so the content type can be
//! determined without reading the file back.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, USER_AGENT};
use super::error::DownloadError;
use crate::sniff::SNIFF_LEN;

/// Connection timeouts shared by the media and metadata clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, including the body.
    pub read_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Builds a reqwest client with the crate's timeouts and User-Agent.
///
/// # Errors
///
/// Returns the reqwest builder error if TLS initialization fails.
pub fn build_http_client(settings: &HttpSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.read_timeout)
        .gzip(true)
        .user_agent(USER_AGENT)
        .build()
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// Total body bytes written to the destination.
    pub bytes_written: u64,
    /// Leading bytes of the body (at most [`SNIFF_LEN`]).
    pub head: Vec<u8>,
}

/// Fetches one media URL to a local path.
///
/// Implementations must leave no file at `dest` when they return an error.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Streams the body of `url` into `dest`, creating or truncating it.
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, DownloadError>;
}

/// HTTP media client.
///
/// Create once and share; clones reuse the same connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the underlying client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self, DownloadError> {
        let client =
            build_http_client(settings).map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl MediaSource for HttpClient {
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, DownloadError> {
        let response = self.send(url).await?;

        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        let result = stream_to_file(&mut file, response, url, dest).await;
        drop(file);

        if result.is_err() {
            debug!(path = %dest.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(dest).await;
        }

        let fetched = result?;
        debug!(bytes = fetched.bytes_written, "transfer complete");
        Ok(fetched)
    }
}

/// Streams a response body to `file`, keeping the leading bytes.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<FetchedFile, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    let mut head = Vec::with_capacity(SNIFF_LEN);

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        if head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(FetchedFile {
        bytes_written,
        head,
    })
}
