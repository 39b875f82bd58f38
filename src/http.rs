//! HTTP fetcher behind an async trait.
//!
//! The engine talks to the network through [`Fetcher`] so traversals are
//! testable against scripted responses. The real implementation wraps
//! reqwest with a per-request timeout; a request that never completes is
//! reported with a synthetic status of 0, which the detector classifies as a
//! network error.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::session::{Method, RequestSpec};

/// A completed (or failed) fetch: status, body, newly issued cookies.
/// Network-level failures use status 0 and an empty body.
#[derive(Debug, Clone, Default)]
pub struct FetchedResponse {
    pub status: u16,
    pub body: String,
    pub cookies: Vec<(String, String)>,
}

impl FetchedResponse {
    /// A synthetic response for a request that never completed.
    pub fn network_failure() -> Self {
        Self::default()
    }
}

/// Sends one request and reports what came back. Implementations never
/// retry; retry policy belongs to the traversal driver.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, spec: &RequestSpec, identity: &str) -> FetchedResponse;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher from engine configuration. The user agent is set per
    /// request from the scheduler's identity pool, not at client build time.
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, spec: &RequestSpec, identity: &str) -> FetchedResponse {
        let url = spec.effective_url();
        let mut request = match spec.method {
            Method::Get => self.client.get(&url),
            Method::Post => self
                .client
                .post(&url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(spec.encoded_body()),
        };

        request = request.header("User-Agent", identity);
        for (name, value) in spec.headers() {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("request to {} failed: {}", url, e);
                return FetchedResponse::network_failure();
            }
        };

        let status = response.status().as_u16();
        let cookies = set_cookie_pairs(response.headers());
        debug!("{} {} ({} new cookies)", status, url, cookies.len());

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!("failed reading body from {}: {}", url, e);
                return FetchedResponse::network_failure();
            }
        };

        FetchedResponse {
            status,
            body,
            cookies,
        }
    }
}

/// Extract (name, value) pairs from Set-Cookie headers.
fn set_cookie_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| {
            let raw = value.to_str().ok()?;
            let pair = raw.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};

    #[test]
    fn test_set_cookie_pairs() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("ASP.NET_SessionId=abc123; path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("prefs=compact"));

        let pairs = set_cookie_pairs(&headers);
        assert_eq!(
            pairs,
            vec![
                ("ASP.NET_SessionId".to_string(), "abc123".to_string()),
                ("prefs".to_string(), "compact".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_cookie_pairs_ignores_malformed() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("no-equals-sign"));
        assert!(set_cookie_pairs(&headers).is_empty());
    }
}
