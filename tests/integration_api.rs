//! HTTP API integration tests
//!
//! Tests the running server end to end against a mock provider, including:
//! - Health reporting
//! - Expert CRUD and cache invalidation
//! - Manual and single-expert refreshes
//! - Ad hoc lookups and the error ledger endpoints

mod common;

use common::*;
use reqwest::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const SLOT_START: &str = "2024-05-02T09:00:00Z";
const SLOT_END: &str = "2024-05-02T10:00:00Z";
const SLOT_UNIX: i64 = 1_714_640_400;

fn expert_body(uid: &str, cronofy_id: &str) -> Value {
    json!({
        "expert_name": format!("Expert {}", uid),
        "cronofy_id": cronofy_id,
        "calendar_ids": [format!("cal_{}", uid)],
        "bubble_uid": uid,
    })
}

async fn post_experts(client: &reqwest::Client, addr: std::net::SocketAddr, body: Value) -> reqwest::Response {
    client
        .post(format!("http://{}/experts/calendars", addr))
        .json(&body)
        .send()
        .await
        .expect("Failed to send request")
}

/// Test 1: Health check reports database and provider state
#[tokio::test]
async fn test_health_endpoint() {
    let mock_server = MockServer::start().await;
    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    let (addr, _shutdown) = run_test_server(state).await;

    let response = reqwest::get(format!("http://{}/health", addr))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database_connected"], true);
    assert_eq!(body["experts_in_database"], 0);
    assert_eq!(body["provider_configured"], true);
    assert_eq!(body["scheduler_running"], false);
    assert_eq!(body["sync_phase"], "idle");
}

/// Test 2: Bulk upsert then list reflects the new roster
#[tokio::test]
async fn test_upsert_and_list_experts() {
    let mock_server = MockServer::start().await;
    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    let (addr, _shutdown) = run_test_server(state).await;
    let client = reqwest::Client::new();

    // Prime the list cache with an empty roster
    let body: Value = client
        .get(format!("http://{}/experts/calendars", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total_count"], 0);

    let response = post_experts(
        &client,
        addr,
        json!({ "experts": [expert_body("uid_a", "crn_a"), expert_body("uid_b", "crn_b")] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["updated_count"], 2);

    let body: Value = client
        .get(format!("http://{}/experts/calendars", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total_count"], 2);
}

/// Test 3: Duplicate provider ids in one request are rejected without writing
#[tokio::test]
async fn test_duplicate_provider_id_rejected() {
    let mock_server = MockServer::start().await;
    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    let (addr, _shutdown) = run_test_server(state).await;
    let client = reqwest::Client::new();

    let response = post_experts(
        &client,
        addr,
        json!({ "experts": [expert_body("uid_a", "crn_same"), expert_body("uid_b", "crn_same")] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client
        .get(format!("http://{}/experts/bubble/uid_a", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test 4: Delete by provider id removes the expert
#[tokio::test]
async fn test_delete_by_provider_id() {
    let mock_server = MockServer::start().await;
    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    let (addr, _shutdown) = run_test_server(state).await;
    let client = reqwest::Client::new();

    post_experts(&client, addr, json!({ "experts": [expert_body("uid_a", "crn_a")] })).await;

    let response = client
        .delete(format!("http://{}/experts/cronofy/crn_a", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("http://{}/experts/cronofy/crn_a", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test 5: Manual refresh updates every stored expert
#[tokio::test]
async fn test_manual_refresh() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .expect(1)
        .mount(&mock_server)
        .await;

    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    seed_experts(state.database.as_ref(), 3).await;
    let (addr, _shutdown) = run_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/experts/availability/refresh", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["processed"], 3);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["batches"], 1);

    let expert: Value = client
        .get(format!("http://{}/experts/bubble/uid_1", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(expert["earliest_available_unix"], SLOT_UNIX);
    assert_eq!(expert["version"], 1);
}

/// Test 6: Single refresh reports the change and failures land in the ledger
#[tokio::test]
async fn test_single_refresh_and_ledger() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .mount(&mock_server)
        .await;

    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    seed_experts(state.database.as_ref(), 1).await;
    let (addr, _shutdown) = run_test_server(state).await;
    let client = reqwest::Client::new();

    // First call hits the 500
    let body: Value = client
        .get(format!("http://{}/experts/bubble/uid_0/availability", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "provider_status");

    let errors: Value = client
        .get(format!("http://{}/experts/availability-errors", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(errors["total_count"], 1);
    assert_eq!(errors["errors"][0]["bubble_uid"], "uid_0");

    // Second call succeeds through the provider id route
    let body: Value = client
        .get(format!("http://{}/experts/cronofy/crn_0/availability", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["changed"], true);
    assert_eq!(body["new_earliest_unix"], SLOT_UNIX);

    let response = client
        .get(format!("http://{}/experts/bubble/uid_0/availability-error", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test 7: Ad hoc lookup returns slots without touching the store
#[tokio::test]
async fn test_ad_hoc_lookup() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .mount(&mock_server)
        .await;

    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    let (addr, _shutdown) = run_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/availability/lookup", addr))
        .json(&json!({ "cronofy_id": "crn_adhoc", "calendar_ids": ["cal_x"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cronofy_id"], "crn_adhoc");
    assert_eq!(body["earliest_available_unix"], SLOT_UNIX);
    assert_eq!(body["slots"].as_array().map(Vec::len), Some(1));

    let health: Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["experts_in_database"], 0);
}

/// Test 8: Unknown expert refresh is a 404
#[tokio::test]
async fn test_refresh_unknown_expert() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .expect(0)
        .mount(&mock_server)
        .await;

    let state = create_test_state(provider_config(&mock_server.uri(), Some(TEST_TOKEN))).await;
    let (addr, _shutdown) = run_test_server(state).await;

    let response = reqwest::get(format!("http://{}/experts/bubble/nobody/availability", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
