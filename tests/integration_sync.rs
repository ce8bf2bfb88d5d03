//! Sync functionality integration tests
//!
//! Tests full refresh passes against a mock provider, including:
//! - Batch failure isolation
//! - Partial responses and missing credentials
//! - Error ledger overwrite and clearing
//! - Scheduler startup and shutdown

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use expert_availability::database::{Database, SqliteDatabase};
use expert_availability::search::{AlgoliaSink, NoopSink};
use expert_availability::sync::{RefreshScheduler, SchedulerConfig};
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SLOT_START: &str = "2024-05-02T09:00:00Z";
const SLOT_END: &str = "2024-05-02T10:00:00Z";
const SLOT_UNIX: i64 = 1_714_640_400;

/// Test 1: Twelve experts, second batch times out
#[tokio::test]
async fn test_timed_out_batch_is_isolated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/availability"))
        .and(MemberCount(10))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/availability"))
        .and(MemberCount(2))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "available_slots": [] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let db = create_test_database().await;
    seed_experts(db.as_ref(), 12).await;

    let sync = build_sync(
        Arc::clone(&db),
        provider_config(&mock_server.uri(), Some(TEST_TOKEN)),
        Arc::new(NoopSink),
    );
    let report = sync.refresh_all().await;

    assert_eq!(report.total, 12);
    assert_eq!(report.batches, 2);
    assert_eq!(report.processed, 10);
    assert_eq!(report.failed, 2);

    let errors = db.list_availability_errors().await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.error_reason == "provider_timeout"));

    let experts = db.list_experts().await.unwrap();
    let refreshed: Vec<_> = experts
        .iter()
        .filter(|e| e.earliest_available_unix == Some(SLOT_UNIX))
        .collect();
    assert_eq!(refreshed.len(), 10);
    assert!(refreshed.iter().all(|e| e.version == 1));

    let failed_uids: Vec<_> = errors.iter().map(|e| e.bubble_uid.as_str()).collect();
    for expert in experts.iter().filter(|e| failed_uids.contains(&e.bubble_uid.as_str())) {
        assert!(expert.last_availability_check.is_none());
        assert_eq!(expert.version, 0);
    }
}

/// Test 2: Expert without any slot resolves to null and still counts as processed
#[tokio::test]
async fn test_partial_slots_resolve_to_null() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/availability"))
        .respond_with(SlotsFor::except(SLOT_START, SLOT_END, &["crn_2"]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let db = create_test_database().await;
    seed_experts(db.as_ref(), 3).await;

    let sync = build_sync(
        Arc::clone(&db),
        provider_config(&mock_server.uri(), Some(TEST_TOKEN)),
        Arc::new(NoopSink),
    );
    let report = sync.refresh_all().await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 0);

    let third = db.get_expert_by_uid("uid_2").await.unwrap().unwrap();
    assert_eq!(third.earliest_available_unix, None);
    assert!(third.last_availability_check.is_some());

    let first = db.get_expert_by_uid("uid_0").await.unwrap().unwrap();
    assert_eq!(first.earliest_available_unix, Some(SLOT_UNIX));
}

/// Test 3: Missing access token never calls the provider
#[tokio::test]
async fn test_missing_token_records_unknown() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .expect(0)
        .mount(&mock_server)
        .await;

    let db = create_test_database().await;
    seed_experts(db.as_ref(), 4).await;

    let sync = build_sync(
        Arc::clone(&db),
        provider_config(&mock_server.uri(), None),
        Arc::new(NoopSink),
    );
    assert!(!sync.provider_configured());

    let report = sync.refresh_all().await;

    assert_eq!(report.processed, 4);
    let experts = db.list_experts().await.unwrap();
    assert!(experts.iter().all(|e| e.earliest_available_unix.is_none()));
    assert!(experts.iter().all(|e| e.last_availability_check.is_some()));
    assert!(db.list_availability_errors().await.unwrap().is_empty());
}

/// Test 4: Ledger entry is overwritten by a repeat failure and cleared on success
#[tokio::test]
async fn test_ledger_overwrite_then_clear() {
    let mock_server = MockServer::start().await;
    let db = create_test_database().await;
    seed_experts(db.as_ref(), 1).await;
    let sync = build_sync(
        Arc::clone(&db),
        provider_config(&mock_server.uri(), Some(TEST_TOKEN)),
        Arc::new(NoopSink),
    );

    // Participant flagged by the provider
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_slots": [],
            "errors": [{ "sub": "crn_0", "key": "calendar_ids", "description": "not found" }]
        })))
        .mount(&mock_server)
        .await;
    let report = sync.refresh_all().await;
    assert_eq!(report.failed, 1);

    let first = db.get_availability_error("uid_0").await.unwrap().unwrap();
    assert_eq!(first.error_reason, "provider_error");
    assert_eq!(first.error_details.as_deref(), Some("calendar_ids: not found"));
    assert!(first.local_time.ends_with("AEST") || first.local_time.ends_with("AEDT"));

    // Whole-batch failure overwrites in place
    mock_server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    sync.refresh_all().await;

    let errors = db.list_availability_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_reason, "provider_status");
    assert!(errors[0].unix_timestamp >= first.unix_timestamp);

    // Success clears the entry
    mock_server.reset().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .mount(&mock_server)
        .await;
    let report = sync.refresh_all().await;

    assert_eq!(report.processed, 1);
    assert!(db.get_availability_error("uid_0").await.unwrap().is_none());
    let expert = db.get_expert_by_uid("uid_0").await.unwrap().unwrap();
    assert_eq!(expert.earliest_available_unix, Some(SLOT_UNIX));
}

/// Test 5: Refreshed experts are pushed to the search index
#[tokio::test]
async fn test_search_index_receives_partial_updates() {
    let provider_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .mount(&provider_server)
        .await;

    let search_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/indexes/experts/batch"))
        .and(header("X-Algolia-API-Key", "KEY"))
        .and(body_partial_json(json!({
            "requests": [{
                "action": "partialUpdateObject",
                "body": { "objectID": "uid_0", "earliest_available_unix": SLOT_UNIX }
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "taskID": 1 })))
        .expect(1)
        .mount(&search_server)
        .await;

    let db = create_test_database().await;
    seed_experts(db.as_ref(), 1).await;

    let sink = AlgoliaSink::new(
        reqwest::Client::new(),
        "APP",
        "KEY",
        "experts",
        Some(&search_server.uri()),
    );
    let sync = build_sync(
        Arc::clone(&db),
        provider_config(&provider_server.uri(), Some(TEST_TOKEN)),
        Arc::new(sink),
    );

    let report = sync.refresh_all().await;
    assert_eq!(report.processed, 1);
}

/// Test 6: Concurrent versioned writes both land
#[tokio::test]
async fn test_concurrent_versioned_updates() {
    let db = create_test_database().await;
    let seeded = seed_experts(db.as_ref(), 1).await;
    let version = seeded[0].version;

    let (a, b) = tokio::join!(
        db.update_availability_versioned("uid_0", version, Some(100), Utc::now()),
        db.update_availability_versioned("uid_0", version, Some(200), Utc::now()),
    );
    a.unwrap();
    b.unwrap();

    let expert = db.get_expert_by_uid("uid_0").await.unwrap().unwrap();
    assert_eq!(expert.version, version + 2);
    assert!(matches!(expert.earliest_available_unix, Some(100) | Some(200)));
}

/// Test 7: Scheduler runs a real pass at startup and stops on shutdown
#[tokio::test]
async fn test_scheduler_runs_startup_pass() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .mount(&mock_server)
        .await;

    let db = create_test_database().await;
    seed_experts(db.as_ref(), 3).await;
    let sync = Arc::new(build_sync(
        Arc::clone(&db),
        provider_config(&mock_server.uri(), Some(TEST_TOKEN)),
        Arc::new(NoopSink),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = RefreshScheduler::new(
        SchedulerConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(3600),
            pass_timeout: Duration::from_secs(30),
        },
        sync,
        shutdown_rx,
    );
    let status = scheduler.status();
    let handle = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(500)).await;

    {
        let status = status.read().await;
        assert!(status.running);
        assert_eq!(status.runs, 1);
        assert_eq!(status.last_report.map(|r| r.processed), Some(3));
    }

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(!status.read().await.running);

    let experts = db.list_experts().await.unwrap();
    assert!(experts
        .iter()
        .all(|e| e.earliest_available_unix == Some(SLOT_UNIX)));
}

/// Test 8: Results and ledger survive reopening a file-backed store
#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("experts.db");
    let db_path = db_path.to_str().unwrap();

    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SlotsFor::all(SLOT_START, SLOT_END))
        .mount(&mock_server)
        .await;

    {
        let db = Arc::new(SqliteDatabase::new(db_path).await.unwrap());
        seed_experts(db.as_ref(), 2).await;
        let sync = build_sync(
            Arc::clone(&db),
            provider_config(&mock_server.uri(), Some(TEST_TOKEN)),
            Arc::new(NoopSink),
        );
        assert_eq!(sync.refresh_all().await.processed, 2);
    }

    let reopened = SqliteDatabase::new(db_path).await.unwrap();
    assert_eq!(reopened.count_experts().await.unwrap(), 2);
    let expert = reopened.get_expert_by_uid("uid_1").await.unwrap().unwrap();
    assert_eq!(expert.earliest_available_unix, Some(SLOT_UNIX));
    assert_eq!(expert.version, 1);
}
