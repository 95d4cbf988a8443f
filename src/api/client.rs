//! HTTP client for the paginated metadata API.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::ApiError;
use super::filter::FilterCriteria;
use super::item::Page;
use crate::download::{HttpSettings, build_http_client};

/// Default metadata endpoint.
pub const DEFAULT_API_BASE: &str = "https://civitai.com/api/v1/images";

/// `X-RateLimit-Remaining` values below this are logged.
const RATE_LIMIT_LOW_WATERMARK: u64 = 10;

/// One page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    /// Query criteria.
    pub criteria: &'a FilterCriteria,
    /// Requested page size.
    pub limit: u32,
    /// Cursor from the previous page, `None` for the first page.
    pub cursor: Option<&'a str>,
}

/// Source of metadata pages.
///
/// Implemented by [`ApiClient`]; tests substitute in-memory sources.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches one page.
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError>;
}

/// reqwest-backed [`PageSource`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ApiClient {
    /// Creates a client for `base_url`, sending `api_key` as a bearer token when set.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] for a malformed base URL or
    /// [`ApiError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        settings: &HttpSettings,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|_| ApiError::InvalidUrl {
            url: base_url.to_string(),
        })?;
        let client = build_http_client(settings).map_err(|source| ApiError::ClientBuild { source })?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Full request URL for `request`.
    #[must_use]
    pub fn request_url(&self, request: PageRequest<'_>) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .extend_pairs(request.criteria.query_params(request.limit, request.cursor));
        url
    }
}

#[async_trait]
impl PageSource for ApiClient {
    #[instrument(skip(self, request), fields(limit = request.limit, cursor = ?request.cursor))]
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError> {
        let url = self.request_url(request);
        let url_str = url.to_string();

        let mut builder = self.client.get(url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::network(&url_str, e))?;

        if let Some(remaining) = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            && remaining < RATE_LIMIT_LOW_WATERMARK
        {
            warn!(remaining, "API rate limit nearly exhausted");
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(ApiError::http_status(url_str, status.as_u16(), retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(&url_str, e))?;
        let page = Page::from_json(&body).map_err(|e| ApiError::decode(&url_str, e))?;

        debug!(
            items = page.items.len(),
            malformed = page.malformed,
            has_next = page.next_cursor.is_some(),
            "page received"
        );
        Ok(page)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::api::filter::{Period, SortOrder};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_request_url_contains_criteria() {
        let client = ApiClient::new(DEFAULT_API_BASE, None, &HttpSettings::default()).unwrap();
        let criteria = FilterCriteria {
            sort: SortOrder::Newest,
            period: Period::Week,
            ..FilterCriteria::default()
        };
        let url = client.request_url(PageRequest {
            criteria: &criteria,
            limit: 50,
            cursor: Some("next|1"),
        });
        let query = url.query().unwrap();
        assert!(query.contains("limit=50"));
        assert!(query.contains("sort=Newest"));
        assert!(query.contains("period=Week"));
        assert!(query.contains("cursor=next%7C1"));
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ApiClient::new("not a url", None, &HttpSettings::default());
        assert!(matches!(result, Err(ApiError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_fetch_page_parses_items_and_sends_key() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/api/v1/images"))
            .and(query_param("sort", "Most Reactions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": 1, "url": "https://cdn/1.png", "nsfwLevel": "Soft"}],
                "metadata": {"nextCursor": "abc"}
            })))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(
            &format!("{}/api/v1/images", mock_server.uri()),
            Some("secret".to_string()),
            &HttpSettings::default(),
        )
        .unwrap();
        let criteria = FilterCriteria::default();
        let page = client
            .fetch_page(PageRequest {
                criteria: &criteria,
                limit: 10,
                cursor: None,
            })
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].rating, 1);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_fetch_page_error_status_and_body() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let criteria = FilterCriteria::default();
        let request = PageRequest {
            criteria: &criteria,
            limit: 10,
            cursor: None,
        };

        let limited = ApiClient::new(
            &format!("{}/limited", mock_server.uri()),
            None,
            &HttpSettings::default(),
        )
        .unwrap();
        match limited.fetch_page(request).await {
            Err(ApiError::HttpStatus {
                status,
                retry_after,
                ..
            }) => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("2"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }

        let garbled = ApiClient::new(
            &format!("{}/garbled", mock_server.uri()),
            None,
            &HttpSettings::default(),
        )
        .unwrap();
        assert!(matches!(
            garbled.fetch_page(request).await,
            Err(ApiError::Decode { .. })
        ));
    }
}
