//! Search index sink
//!
//! A thin partial-update sink for availability records. Failures are
//! reported to the caller, which logs them; the store stays authoritative.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::models::SearchRecord;

/// Destination for availability partial updates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchSink: Send + Sync {
    /// Whether pushes reach a real index
    fn is_enabled(&self) -> bool;

    /// Apply one bounded batch of partial updates
    async fn push(&self, records: &[SearchRecord]) -> Result<(), SearchError>;
}

/// Sink used when no index is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl SearchSink for NoopSink {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn push(&self, records: &[SearchRecord]) -> Result<(), SearchError> {
        debug!(records = records.len(), "Search sink disabled, dropping records");
        Ok(())
    }
}

/// Algolia batch-endpoint sink
pub struct AlgoliaSink {
    client: Client,
    endpoint: String,
    app_id: String,
    api_key: String,
}

impl AlgoliaSink {
    pub fn new(client: Client, app_id: &str, api_key: &str, index_name: &str, base_url: Option<&str>) -> Self {
        let base = base_url
            .map(|b| b.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}.algolia.net", app_id));
        Self {
            client,
            endpoint: format!("{}/1/indexes/{}/batch", base, index_name),
            app_id: app_id.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SearchSink for AlgoliaSink {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn push(&self, records: &[SearchRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let requests: Vec<_> = records
            .iter()
            .map(|r| json!({ "action": "partialUpdateObject", "body": r }))
            .collect();

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Algolia-Application-Id", &self.app_id)
            .header("X-Algolia-API-Key", &self.api_key)
            .timeout(Duration::from_secs(30))
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(records = records.len(), "Pushed records to search index");
        Ok(())
    }
}

/// Build the sink selected by configuration
pub fn sink_from_config(config: &SearchConfig, client: Client) -> Box<dyn SearchSink> {
    match (&config.app_id, &config.api_key) {
        (Some(app_id), Some(api_key)) => Box::new(AlgoliaSink::new(
            client,
            app_id,
            api_key,
            &config.index_name,
            config.base_url.as_deref(),
        )),
        _ => Box::new(NoopSink),
    }
}
