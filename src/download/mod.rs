//! Media transfer primitives.
//!
//! This module provides the pieces the worker pool composes for each item:
//!
//! - [`HttpClient`] / [`MediaSource`] - streaming a media URL to disk
//! - [`RetryPolicy`] / [`with_retry`] - bounded exponential backoff around any fetch
//! - [`RateLimiter`] - minimum interval between metadata page fetches
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::download::{HttpClient, HttpSettings, MediaSource, RetryPolicy, with_retry};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(&HttpSettings::default())?;
//! let outcome = with_retry(&RetryPolicy::default(), "media", |_| {
//!     client.fetch_to("https://cdn.example.com/1.jpeg", Path::new("1.part"))
//! })
//! .await;
//! println!("{} bytes after {} attempt(s)", outcome.result?.bytes_written, outcome.attempts);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod rate_limiter;
mod retry;

pub use client::{FetchedFile, HttpClient, HttpSettings, MediaSource, build_http_client};
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{
    Attempted, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy,
    Retryable, with_retry,
};
pub(crate) use retry::{classify_http_status, is_tls_error};
