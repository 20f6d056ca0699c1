pub mod auth;
pub mod session;
pub mod users;

use crate::error::{BulkError, Result};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_API_BETA: &str = "https://graph.microsoft.com/beta";

/// Retries for transient transport and 5xx failures. Throttling (429) is
/// not retried here, it is surfaced as `BulkError::Throttled` for the
/// engine's invoker.
const MAX_TRANSIENT_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30000;
const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

/// Calculate backoff with jitter for exponential backoff
fn calculate_backoff_with_jitter(attempt: u32) -> Duration {
    let base_backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let capped_backoff = base_backoff.min(MAX_BACKOFF_MS);

    let jitter_range = (capped_backoff as f64 * JITTER_FACTOR) as i64;
    let jitter = if jitter_range > 0 {
        use rand::Rng;
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped_backoff as i64 + jitter).max(100) as u64)
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Graph API client
///
/// Cheap to share behind an `Arc`; workers only read from it.
pub struct GraphClient {
    client: Client,
    access_token: String,
    base_url: String,
    beta_url: String,
}

impl GraphClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_urls(access_token, GRAPH_API_BASE, GRAPH_API_BETA)
    }

    /// Point the client at another host, e.g. a mock server in tests
    pub fn with_base_urls(access_token: String, base_url: &str, beta_url: &str) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            beta_url: beta_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, base: &str, endpoint: &str) -> String {
        format!("{}/{}", base, endpoint.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.url(&self.base_url, endpoint);
        self.send::<(), T>(Method::GET, &url, None).await
    }

    pub async fn get_beta<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.url(&self.beta_url, endpoint);
        self.send::<(), T>(Method::GET, &url, None).await
    }

    pub async fn post<T: Serialize, R: DeserializeOwned>(&self, endpoint: &str, body: &T) -> Result<R> {
        let url = self.url(&self.base_url, endpoint);
        self.send(Method::POST, &url, Some(body)).await
    }

    pub async fn patch<T: Serialize, R: DeserializeOwned>(&self, endpoint: &str, body: &T) -> Result<R> {
        let url = self.url(&self.base_url, endpoint);
        self.send(Method::PATCH, &url, Some(body)).await
    }

    pub async fn patch_beta<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R> {
        let url = self.url(&self.beta_url, endpoint);
        self.send(Method::PATCH, &url, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<()> {
        let url = self.url(&self.base_url, endpoint);
        self.send::<(), ()>(Method::DELETE, &url, None).await
    }

    /// Send one request, retrying connection errors and 5xx responses
    ///
    /// Empty bodies (204 No Content) deserialize as JSON `null`, so `()` and
    /// `serde_json::Value` both work as response types for mutations.
    async fn send<T: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&T>,
    ) -> Result<R> {
        let mut attempt = 0;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(&self.access_token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt + 1 < MAX_TRANSIENT_RETRIES {
                        let wait_time = calculate_backoff_with_jitter(attempt);
                        warn!(%method, url, error = %e, ?wait_time, "Connection error, retrying");
                        tokio::time::sleep(wait_time).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e.into());
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(response.headers());
                debug!(%method, url, ?retry_after, "Throttled by Graph");
                return Err(BulkError::Throttled { retry_after });
            }

            if status.is_server_error() && attempt + 1 < MAX_TRANSIENT_RETRIES {
                let wait_time = calculate_backoff_with_jitter(attempt);
                warn!(%method, url, %status, ?wait_time, "Server error, retrying");
                tokio::time::sleep(wait_time).await;
                attempt += 1;
                continue;
            }

            let text = response.text().await?;

            if !status.is_success() {
                let enhanced_error = crate::error::enhance_graph_error(&text);
                return Err(BulkError::GraphApiError(format!(
                    "HTTP {}: {}",
                    status, enhanced_error
                )));
            }

            let text = if text.trim().is_empty() { "null" } else { text.as_str() };
            return Ok(serde_json::from_str(text)?);
        }
    }
}

/// Generic paginated response from Graph API
#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

impl GraphClient {
    /// Fetch all pages of a paginated endpoint, following `@odata.nextLink`
    ///
    /// A 429 on any page aborts the listing with `BulkError::Throttled`;
    /// callers wrap this in a `RetryingInvoker` to absorb it.
    pub async fn get_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let mut all_items: Vec<T> = Vec::new();
        let mut current_url = self.url(&self.base_url, endpoint);

        loop {
            let response: PaginatedResponse<T> =
                self.send::<(), _>(Method::GET, &current_url, None).await?;
            all_items.extend(response.value);

            match response.next_link {
                Some(next) => current_url = next,
                None => break,
            }
        }

        Ok(all_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_stays_within_jitter_band() {
        for attempt in 0..6 {
            let backoff = calculate_backoff_with_jitter(attempt).as_millis() as f64;
            let nominal = (INITIAL_BACKOFF_MS * 2u64.pow(attempt)).min(MAX_BACKOFF_MS) as f64;
            assert!(backoff >= nominal * (1.0 - JITTER_FACTOR) - 1.0);
            assert!(backoff <= nominal * (1.0 + JITTER_FACTOR) + 1.0);
        }
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_url_joining() {
        let client = GraphClient::with_base_urls("t".into(), "http://localhost:1/v1.0/", "http://localhost:1/beta");
        assert_eq!(client.url(&client.base_url, "/users/abc"), "http://localhost:1/v1.0/users/abc");
        assert_eq!(client.url(&client.beta_url, "users"), "http://localhost:1/beta/users");
    }
}
