//! Error types for the metadata API.

use std::time::Duration;

use thiserror::Error;

use crate::download::{FailureType, Retryable, classify_http_status, is_tls_error, parse_retry_after};

/// Errors raised while fetching or decoding a metadata page.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// Request URL.
        url: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out.
    #[error("timeout fetching {url}")]
    Timeout {
        /// Request URL.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Raw `Retry-After` header value, if present.
        retry_after: Option<String>,
    },

    /// The response body was not a page object.
    #[error("malformed page from {url}: {source}")]
    Decode {
        /// Request URL.
        url: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The configured base URL is not a valid absolute URL.
    #[error("invalid API base URL: {url}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    /// Creates a network error, mapping reqwest timeouts to [`ApiError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }
}

impl Retryable for ApiError {
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
            // A truncated body is worth another try.
            Self::Decode { .. } => FailureType::Transient,
            Self::InvalidUrl { .. } | Self::ClientBuild { .. } => FailureType::Permanent,
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
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        assert_eq!(
            ApiError::http_status("u", 502, None).failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            ApiError::http_status("u", 400, None).failure_type(),
            FailureType::Permanent
        );
        assert_eq!(
            ApiError::http_status("u", 401, None).failure_type(),
            FailureType::NeedsAuth
        );
        assert_eq!(
            ApiError::InvalidUrl { url: "x".into() }.failure_type(),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_api_error_retry_after() {
        let error = ApiError::http_status("u", 429, Some("12".to_string()));
        assert_eq!(error.failure_type(), FailureType::RateLimited);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_api_error_display_includes_url() {
        let error = ApiError::http_status("https://api.example.com/images", 503, None);
        let msg = error.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("https://api.example.com/images"));
    }
}
