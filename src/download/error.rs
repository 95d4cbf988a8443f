//! Error types for media transfers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::rate_limiter::parse_retry_after;
use super::retry::{FailureType, Retryable, classify_http_status, is_tls_error};

/// Errors that can occur while fetching a media file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Raw `Retry-After` header value, if present.
        retry_after: Option<String>,
    },

    /// File system error while writing the temporary file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path the source error does not carry.

impl Retryable for DownloadError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::HttpStatus { status, .. } => classify_http_status(*status),
            Self::Timeout { .. } => FailureType::Transient,
            Self::Network { source, .. } => {
                if is_tls_error(source) {
                    FailureType::Permanent
                } else {
                    FailureType::Transient
                }
            }
            Self::Io { .. } | Self::InvalidUrl { .. } | Self::ClientBuild { .. } => {
                FailureType::Permanent
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://cdn.example.com/1.png");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://cdn.example.com/1.png"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://cdn.example.com/1.png", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://cdn.example.com/1.png"));
    }

    #[test]
    fn test_download_error_io_display() {
        let error = DownloadError::io(
            "/tmp/x.part",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/x.part"));
    }

    #[test]
    fn test_failure_type_mapping() {
        assert_eq!(
            DownloadError::http_status("u", 503).failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            DownloadError::http_status("u", 404).failure_type(),
            FailureType::Permanent
        );
        assert_eq!(
            DownloadError::http_status("u", 429).failure_type(),
            FailureType::RateLimited
        );
        assert_eq!(DownloadError::timeout("u").failure_type(), FailureType::Transient);
        assert_eq!(
            DownloadError::invalid_url("u").failure_type(),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_retry_after_is_parsed_from_status() {
        let error = DownloadError::http_status_with_retry_after("u", 429, Some("7".to_string()));
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(DownloadError::http_status("u", 429).retry_after(), None);
    }
}
