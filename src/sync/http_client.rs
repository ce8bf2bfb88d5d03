//! Rate-limited HTTP client for the availability provider
//!
//! This module provides the single shared, connection-pooled client used for
//! provider calls. It enforces a process-wide minimum interval between
//! requests, bounds concurrency with a semaphore, and applies a hard
//! wall-clock timeout to every call.

use crate::config::RateLimitConfig;
use crate::error::ProviderError;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// HTTP client with rate limiting capabilities
///
/// Features:
/// - Minimum interval between consecutive requests, shared by all callers
/// - Global concurrent request limiting via semaphore
/// - Per-request timeout reported distinctly from other transport failures
#[derive(Debug, Clone)]
pub struct HttpClientWithRateLimit {
    client: Client,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<Option<Instant>>>,
    config: RateLimitConfig,
}

impl HttpClientWithRateLimit {
    /// Create a new rate-limited HTTP client
    pub fn new(config: RateLimitConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a rate-limited HTTP client with a custom reqwest Client
    pub fn with_client(client: Client, config: RateLimitConfig) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(None)),
            config,
        }
    }

    /// POST a JSON body and decode a JSON response
    ///
    /// # Arguments
    ///
    /// * `url` - Target URL
    /// * `bearer_token` - Sent as `Authorization: Bearer <token>`
    /// * `body` - Request payload
    /// * `timeout` - Hard wall-clock limit for the whole exchange
    pub async fn post_json<B>(
        &self,
        url: &str,
        bearer_token: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProviderError>
    where
        B: Serialize + ?Sized,
    {
        // Acquire semaphore permit to limit concurrent requests
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProviderError::Transport("HTTP client shut down".to_string()))?;

        self.wait_for_rate_limit().await;

        debug!(url = url, "Sending HTTP POST request");

        let response = self
            .client
            .post(url)
            .bearer_auth(bearer_token)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                debug!(url = url, body_size = text.len(), "Received response");
                serde_json::from_str(&text).map_err(|e| {
                    ProviderError::InvalidResponse(format!("Response is not valid JSON: {}", e))
                })
            }
            status if status.is_server_error() => {
                warn!(url = url, status = status.as_u16(), "Server error");
                Err(ProviderError::Status {
                    status: status.as_u16(),
                    body: text,
                })
            }
            status => {
                warn!(url = url, status = status.as_u16(), "Unexpected status");
                Err(ProviderError::Status {
                    status: status.as_u16(),
                    body: text,
                })
            }
        }
    }

    /// Wait until the minimum interval since the previous request has passed
    ///
    /// The lock is held across the sleep so that check-and-update is
    /// single-flight: concurrent callers queue behind the gate.
    async fn wait_for_rate_limit(&self) {
        let min_interval = Duration::from_millis(self.config.min_interval_ms);
        let mut last_request = self.last_request.lock().await;

        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!(wait_ms = wait_time.as_millis(), "Waiting for rate limit");
                tokio::time::sleep(wait_time).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Get current configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get number of available permits (concurrent request slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_connect() {
        ProviderError::Connection(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unthrottled() -> HttpClientWithRateLimit {
        HttpClientWithRateLimit::new(RateLimitConfig {
            min_interval_ms: 0,
            max_concurrent: 2,
        })
        .unwrap()
    }

    // Test 1: POST sends bearer auth and JSON, decodes JSON response
    #[tokio::test]
    async fn test_post_json_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/availability"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_json(json!({"hello": "world"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = unthrottled();
        let result = client
            .post_json(
                &format!("{}/v1/availability", mock_server.uri()),
                "secret",
                &json!({"hello": "world"}),
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(result.unwrap(), json!({"ok": true}));
    }

    // Test 2: 5xx surfaces as a status error with body
    #[tokio::test]
    async fn test_server_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        let result = unthrottled()
            .post_json(&mock_server.uri(), "t", &json!({}), Duration::from_secs(5))
            .await;

        assert_eq!(
            result.unwrap_err(),
            ProviderError::Status {
                status: 502,
                body: "bad gateway".to_string()
            }
        );
    }

    // Test 3: 4xx surfaces as a status error
    #[tokio::test]
    async fn test_client_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"errors": {}})))
            .mount(&mock_server)
            .await;

        let result = unthrottled()
            .post_json(&mock_server.uri(), "t", &json!({}), Duration::from_secs(5))
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::Status { status: 422, .. })
        ));
    }

    // Test 4: Timeout is reported distinctly
    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let result = unthrottled()
            .post_json(
                &mock_server.uri(),
                "t",
                &json!({}),
                Duration::from_millis(50),
            )
            .await;

        assert_eq!(result.unwrap_err(), ProviderError::Timeout);
    }

    // Test 5: Connection refused is a connection error
    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = unthrottled()
            .post_json(
                &format!("http://{}/v1/availability", addr),
                "t",
                &json!({}),
                Duration::from_secs(2),
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Connection(_))));
    }

    // Test 6: Non-JSON success body is an invalid response
    #[tokio::test]
    async fn test_invalid_json_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&mock_server)
            .await;

        let result = unthrottled()
            .post_json(&mock_server.uri(), "t", &json!({}), Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    // Test 7: Concurrent callers are spaced by the minimum interval
    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gate_is_shared() {
        let client = HttpClientWithRateLimit::new(RateLimitConfig {
            min_interval_ms: 1000,
            max_concurrent: 4,
        })
        .unwrap();

        let start = Instant::now();
        tokio::join!(
            client.wait_for_rate_limit(),
            client.wait_for_rate_limit(),
            client.wait_for_rate_limit(),
        );

        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    // Test 8: Clones share the same gate
    #[tokio::test(start_paused = true)]
    async fn test_clones_share_gate() {
        let client = HttpClientWithRateLimit::new(RateLimitConfig {
            min_interval_ms: 500,
            max_concurrent: 1,
        })
        .unwrap();
        let clone = client.clone();

        let start = Instant::now();
        client.wait_for_rate_limit().await;
        clone.wait_for_rate_limit().await;

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(clone.available_permits(), 1);
    }
}
