//! HTTP source gateway with rate limiting
//!
//! Offset-paginated fetches against the listing site, throttled for
//! respectful crawling. Timeouts surface as transient faults; other
//! transport failures are fatal to the run.

use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::domain::errors::FetchError;
use crate::domain::gateways::SourceGateway;

/// Configuration for the HTTP source
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpSourceConfig {
    /// Listing page URL; the cursor is appended as a query parameter
    pub base_url: String,
    /// Query parameter carrying the numeric offset
    pub offset_param: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_requests_per_second: u32,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/listings".to_string(),
            offset_param: "offset".to_string(),
            user_agent: "plate-watch/0.2 (listing sync)".to_string(),
            timeout_ms: 30_000,
            max_requests_per_second: 2,
        }
    }
}

/// Rate-limited HTTP implementation of the source gateway
pub struct HttpSourceGateway {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpSourceConfig,
    cancel: CancellationToken,
}

impl HttpSourceGateway {
    pub fn new(config: HttpSourceConfig) -> anyhow::Result<Self> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// The token lets an in-flight fetch be abandoned on shutdown; the
    /// controller's pause path never forces it mid-fetch.
    pub fn with_cancellation(
        config: HttpSourceConfig,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| anyhow::anyhow!("invalid user agent: {e}"))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second.max(1)).expect("nonzero"),
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
            cancel,
        })
    }

    fn page_url(&self, cursor: u32) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| FetchError::Transport {
            cursor,
            message: format!("invalid base url: {e}"),
        })?;
        url.query_pairs_mut()
            .append_pair(&self.config.offset_param, &cursor.to_string());
        Ok(url)
    }

    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl SourceGateway for HttpSourceGateway {
    async fn fetch(&self, cursor: u32) -> Result<Option<String>, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled { cursor });
        }

        tokio::select! {
            _ = self.rate_limiter.until_ready() => {}
            _ = self.cancel.cancelled() => {
                return Err(FetchError::Cancelled { cursor });
            }
        }

        let url = self.page_url(cursor)?;
        debug!(cursor, %url, "fetching listing page");

        let response = tokio::select! {
            result = self.client.get(url.clone()).send() => result,
            _ = self.cancel.cancelled() => {
                warn!(cursor, "fetch cancelled mid-flight");
                return Err(FetchError::Cancelled { cursor });
            }
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    cursor,
                    timeout_ms: self.config.timeout_ms,
                }
            } else {
                FetchError::Transport {
                    cursor,
                    message: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Transport {
                cursor,
                message: format!("status {} from {url}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    cursor,
                    timeout_ms: self.config.timeout_ms,
                }
            } else {
                FetchError::Transport {
                    cursor,
                    message: format!("body read failed: {e}"),
                }
            }
        })?;

        debug!(cursor, bytes = body.len(), "page fetched");
        if body.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_creation() {
        let gateway = HttpSourceGateway::new(HttpSourceConfig::default());
        assert!(gateway.is_ok());
    }

    #[test]
    fn test_cursor_lands_in_query() {
        let gateway = HttpSourceGateway::new(HttpSourceConfig {
            base_url: "https://example.com/listings?sort=fresh".to_string(),
            ..Default::default()
        })
        .unwrap();
        let url = gateway.page_url(40).unwrap();
        assert_eq!(url.as_str(), "https://example.com/listings?sort=fresh&offset=40");
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let gateway =
            HttpSourceGateway::with_cancellation(HttpSourceConfig::default(), cancel).unwrap();
        let err = gateway.fetch(0).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled { cursor: 0 }));
    }
}
