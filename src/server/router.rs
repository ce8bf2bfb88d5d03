//! HTTP router for expert-availability
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks
//! - Expert calendar CRUD
//! - Manual availability refreshes and ad hoc lookups
//! - The availability error ledger

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::TtlCache;
use crate::database::Database;
use crate::error::{AppError, DbError};
use crate::experts::ExpertManager;
use crate::models::{AdHocTarget, ExpertInput, ExpertRecord, SyncReport};
use crate::sync::{AvailabilitySync, SharedSchedulerStatus, SyncPhase};

/// Shared application state
pub struct AppState<D: Database> {
    /// Database
    pub database: Arc<D>,

    /// Expert CRUD
    pub experts: Arc<ExpertManager<D>>,

    /// Refresh orchestrator
    pub sync: Arc<AvailabilitySync<D>>,

    /// Periodic trigger status, absent when the scheduler is disabled
    pub scheduler_status: Option<SharedSchedulerStatus>,

    /// Expert listing cache
    pub cache: Arc<TtlCache<Vec<ExpertRecord>>>,

    /// Whether availability is pushed to a real search index
    pub search_enabled: bool,
}

impl<D: Database> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            database: Arc::clone(&self.database),
            experts: Arc::clone(&self.experts),
            sync: Arc::clone(&self.sync),
            scheduler_status: self.scheduler_status.clone(),
            cache: Arc::clone(&self.cache),
            search_enabled: self.search_enabled,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database_connected: bool,
    pub experts_in_database: Option<u64>,
    pub scheduler_running: bool,
    pub sync_phase: SyncPhase,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub provider_configured: bool,
    pub search_enabled: bool,
    pub cache_entries: u64,
    pub timestamp: DateTime<Utc>,
}

/// Bulk expert submission
#[derive(Debug, Deserialize)]
pub struct ExpertBatchRequest {
    pub experts: Vec<ExpertInput>,
}

/// Ad hoc availability lookup
#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub cronofy_id: String,
    pub calendar_ids: Vec<String>,
}

/// Build the main application router
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<D>))
        // Expert CRUD
        .route(
            "/experts/calendars",
            get(list_experts_handler::<D>).post(upsert_experts_handler::<D>),
        )
        .route(
            "/experts/bubble/:uid",
            get(get_by_uid_handler::<D>).delete(delete_by_uid_handler::<D>),
        )
        .route(
            "/experts/cronofy/:id",
            get(get_by_provider_id_handler::<D>).delete(delete_by_provider_id_handler::<D>),
        )
        // Refreshes
        .route(
            "/experts/availability/refresh",
            post(refresh_all_handler::<D>),
        )
        .route(
            "/experts/bubble/:uid/availability",
            get(refresh_by_uid_handler::<D>),
        )
        .route(
            "/experts/cronofy/:id/availability",
            get(refresh_by_provider_id_handler::<D>),
        )
        .route("/availability/lookup", post(lookup_handler::<D>))
        // Error ledger
        .route(
            "/experts/availability-errors",
            get(list_errors_handler::<D>),
        )
        .route(
            "/experts/bubble/:uid/availability-error",
            get(get_error_handler::<D>),
        )
        .with_state(state)
}

/// Map an application error to a status and JSON body
///
/// Internal failures are logged and answered with `message` only.
fn error_response(err: &AppError, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    match err {
        AppError::Validation(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
        AppError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": err.to_string() })),
        ),
        AppError::Database(DbError::ConstraintViolation(_)) => {
            tracing::warn!(error = %err, "Conflicting expert write");
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "Conflicting expert record" })),
            )
        }
        _ => {
            tracing::error!(error = %err, "{}", message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": message })),
            )
        }
    }
}

// =============================================================================
// Health Handler
// =============================================================================

async fn health_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    let count = state.experts.count().await;
    if let Err(e) = &count {
        tracing::error!(error = %e, "Health check could not reach the database");
    }

    let (scheduler_running, last_refresh, last_report) = match &state.scheduler_status {
        Some(status) => {
            let status = status.read().await;
            (status.running, status.last_run, status.last_report)
        }
        None => (false, None, None),
    };

    Json(HealthResponse {
        status: if count.is_ok() { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database_connected: count.is_ok(),
        experts_in_database: count.ok(),
        scheduler_running,
        sync_phase: state.sync.phase().await,
        last_refresh,
        last_report,
        provider_configured: state.sync.provider_configured(),
        search_enabled: state.search_enabled,
        cache_entries: state.cache.len().await,
        timestamp: Utc::now(),
    })
}

// =============================================================================
// Expert Handlers
// =============================================================================

async fn list_experts_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.experts.list_all().await {
        Ok(experts) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "total_count": experts.len(),
                "experts": experts,
            })),
        ),
        Err(e) => error_response(&e, "Failed to list experts"),
    }
}

async fn upsert_experts_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Json(request): Json<ExpertBatchRequest>,
) -> impl IntoResponse {
    match state.experts.bulk_upsert(request.experts).await {
        Ok(count) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": format!("Successfully processed {} expert calendar mappings", count),
                "updated_count": count,
            })),
        ),
        Err(e) => error_response(&e, "Failed to store experts"),
    }
}

async fn get_by_uid_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(uid): Path<String>,
) -> impl IntoResponse {
    match state.experts.get_by_uid(&uid).await {
        Ok(expert) => (StatusCode::OK, Json(serde_json::json!(expert))),
        Err(e) => error_response(&e, "Failed to get expert"),
    }
}

async fn get_by_provider_id_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.experts.get_by_provider_id(&id).await {
        Ok(expert) => (StatusCode::OK, Json(serde_json::json!(expert))),
        Err(e) => error_response(&e, "Failed to get expert"),
    }
}

async fn delete_by_uid_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(uid): Path<String>,
) -> impl IntoResponse {
    match state.experts.delete_by_uid(&uid).await {
        Ok(expert) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": format!("Expert {} deleted successfully", expert.bubble_uid)
            })),
        ),
        Err(e) => error_response(&e, "Failed to delete expert"),
    }
}

async fn delete_by_provider_id_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.experts.delete_by_provider_id(&id).await {
        Ok(expert) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": format!("Expert {} deleted successfully", expert.bubble_uid)
            })),
        ),
        Err(e) => error_response(&e, "Failed to delete expert"),
    }
}

// =============================================================================
// Refresh Handlers
// =============================================================================

async fn refresh_all_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    tracing::info!("Manual availability refresh triggered");

    // Spawned so the pass finishes even if the client goes away
    let sync = Arc::clone(&state.sync);
    let report = match tokio::spawn(async move { sync.refresh_all().await }).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Manual availability refresh task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Availability refresh failed" })),
            );
        }
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Availability refresh completed",
            "total": report.total,
            "processed": report.processed,
            "failed": report.failed,
            "batches": report.batches,
        })),
    )
}

async fn refresh_by_uid_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(uid): Path<String>,
) -> impl IntoResponse {
    match state.sync.refresh_one(&uid).await {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::json!(outcome))),
        Err(e) => error_response(&e, "Error fetching availability"),
    }
}

async fn refresh_by_provider_id_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = match state.experts.get_by_provider_id(&id).await {
        Ok(expert) => state.sync.refresh_one(&expert.bubble_uid).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::json!(outcome))),
        Err(e) => error_response(&e, "Error fetching availability"),
    }
}

async fn lookup_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Json(request): Json<LookupRequest>,
) -> impl IntoResponse {
    let target = match AdHocTarget::for_provider(&request.cronofy_id, &request.calendar_ids) {
        Ok(target) => target,
        Err(e) => return error_response(&AppError::from(e), "Invalid lookup"),
    };

    match state.sync.lookup(&target).await {
        Ok(lookup) => (StatusCode::OK, Json(serde_json::json!(lookup))),
        Err(e) => error_response(&e, "Error fetching availability"),
    }
}

// =============================================================================
// Error Ledger Handlers
// =============================================================================

async fn list_errors_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.experts.list_errors().await {
        Ok(errors) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "total_count": errors.len(),
                "errors": errors,
            })),
        ),
        Err(e) => error_response(&e, "Failed to list availability errors"),
    }
}

async fn get_error_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(uid): Path<String>,
) -> impl IntoResponse {
    match state.experts.get_error(&uid).await {
        Ok(entry) => (StatusCode::OK, Json(serde_json::json!(entry))),
        Err(e) => error_response(&e, "Failed to get availability error"),
    }
}
