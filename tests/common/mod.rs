//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use expert_availability::cache::TtlCache;
use expert_availability::config::{ProviderConfig, RateLimitConfig, RetryConfig, ServerConfig};
use expert_availability::database::{Database, SqliteDatabase};
use expert_availability::experts::ExpertManager;
use expert_availability::models::{ExpertRecord, NewExpert};
use expert_availability::provider::CronofyClient;
use expert_availability::search::{NoopSink, SearchSink};
use expert_availability::server::{AppState, Server};
use expert_availability::sync::{
    planner_from_config, AvailabilitySync, HttpClientWithRateLimit, SyncSettings,
};
use serde_json::{json, Value};
use wiremock::{Match, Request, Respond, ResponseTemplate};

pub const TEST_TOKEN: &str = "test-cronofy-token";

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(":memory:")
            .await
            .expect("Failed to create test database"),
    )
}

/// Store `count` experts with uids `uid_0..` and provider ids `crn_0..`
pub async fn seed_experts<D: Database>(db: &D, count: usize) -> Vec<ExpertRecord> {
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let expert = NewExpert::new(
            format!("Expert {}", i),
            format!("crn_{}", i),
            &[format!("cal_{}", i)],
            format!("uid_{}", i),
        )
        .expect("valid expert");
        records.push(db.upsert_expert(&expert).await.expect("upsert"));
    }
    records
}

/// Provider settings pointing at a mock server, with fast retries and no throttling
pub fn provider_config(base_uri: &str, token: Option<&str>) -> ProviderConfig {
    ProviderConfig {
        api_url: format!("{}/v1/availability", base_uri),
        access_token: token.map(str::to_string),
        request_timeout_secs: 1,
        retry: RetryConfig {
            max_retries: 0,
            initial_backoff_ms: 10,
            max_backoff_ms: 10,
            backoff_multiplier: 1.0,
            jitter: false,
        },
        rate_limit: RateLimitConfig {
            min_interval_ms: 0,
            max_concurrent: 2,
        },
        ..Default::default()
    }
}

/// Build an orchestrator against the real Cronofy client
pub fn build_sync(
    db: Arc<SqliteDatabase>,
    provider: ProviderConfig,
    sink: Arc<dyn SearchSink>,
) -> AvailabilitySync<SqliteDatabase> {
    let http = HttpClientWithRateLimit::new(provider.rate_limit.clone()).expect("http client");
    let planner = planner_from_config(&provider).expect("planner");
    let settings = SyncSettings {
        provider: provider.clone(),
        inter_batch_delay: Duration::ZERO,
        sink_retry: RetryConfig {
            max_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    };

    AvailabilitySync::new(
        db,
        Arc::new(CronofyClient::new(http, provider)),
        sink,
        planner,
        settings,
    )
    .expect("orchestrator")
}

/// Create a test application state around a mock provider
pub async fn create_test_state(provider: ProviderConfig) -> AppState<SqliteDatabase> {
    let database = create_test_database().await;
    let cache = Arc::new(TtlCache::new(Duration::from_secs(300)));
    let sync = build_sync(Arc::clone(&database), provider, Arc::new(NoopSink))
        .with_cache(Arc::clone(&cache));

    AppState {
        database: Arc::clone(&database),
        experts: Arc::new(ExpertManager::new(Arc::clone(&database), Arc::clone(&cache))),
        sync: Arc::new(sync),
        scheduler_status: None,
        cache,
        search_enabled: false,
    }
}

/// Create a test server configuration with a random port
pub fn create_test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    }
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(
    state: AppState<SqliteDatabase>,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = Server::app(state);

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}

/// Subject ids in an availability request body
pub fn request_subs(request: &Request) -> Vec<String> {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
    body["participants"][0]["members"]
        .as_array()
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m["sub"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Matches availability requests carrying exactly `n` members
pub struct MemberCount(pub usize);

impl Match for MemberCount {
    fn matches(&self, request: &Request) -> bool {
        request_subs(request).len() == self.0
    }
}

/// Answers each request with one slot per member at `start`, except `skip`
pub struct SlotsFor {
    pub start: &'static str,
    pub end: &'static str,
    pub skip: HashSet<String>,
}

impl SlotsFor {
    pub fn all(start: &'static str, end: &'static str) -> Self {
        Self {
            start,
            end,
            skip: HashSet::new(),
        }
    }

    pub fn except(start: &'static str, end: &'static str, skip: &[&str]) -> Self {
        Self {
            start,
            end,
            skip: skip.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Respond for SlotsFor {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let slots: Vec<Value> = request_subs(request)
            .into_iter()
            .filter(|sub| !self.skip.contains(sub))
            .map(|sub| {
                json!({
                    "start": self.start,
                    "end": self.end,
                    "participants": [{ "sub": sub }]
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "available_slots": slots }))
    }
}
