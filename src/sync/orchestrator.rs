//! Availability sync orchestrator
//!
//! Drives one refresh pass end to end: load the roster, plan batches, query
//! the provider, reconcile, persist, and publish to the search sink. A pass
//! never aborts on a single failure. Per-expert problems go to the error
//! ledger and whole-batch failures mark every member of that batch failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::TtlCache;
use crate::config::{Config, ConfigError, ProviderConfig, RetryConfig};
use crate::database::Database;
use crate::error::{AppError, DbError, ProviderError, ValidationError};
use crate::models::{
    AdHocTarget, AvailabilityFailure, AvailabilityLookup, AvailabilityQuery, AvailabilityTarget,
    BatchAvailability, BatchMember, ExpertOutcome, ExpertRecord, RefreshOutcome, SearchRecord, SyncReport,
    REASON_PROCESSING_ERROR,
};
use crate::provider::{fetch_for, AvailabilityProvider};
use crate::search::SearchSink;
use crate::sync::planner::BatchPlanner;
use crate::sync::retry::with_retry;

/// Where the current full pass is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Planning,
    Fetching,
    Publishing,
}

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Query window and meeting constraints
    pub provider: ProviderConfig,
    /// Pause between consecutive batches, never after the last
    pub inter_batch_delay: Duration,
    /// Records per search sink push
    pub search_batch_size: usize,
    /// Retry policy for search sink pushes
    pub sink_retry: RetryConfig,
    /// Zone for ledger local times
    pub timezone: Tz,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            provider: config.provider.clone(),
            inter_batch_delay: Duration::from_millis(config.scheduler.inter_batch_delay_ms),
            search_batch_size: config.search.batch_size.max(1),
            sink_retry: config.provider.retry.clone(),
            timezone: config.ledger.tz()?,
        })
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            inter_batch_delay: Duration::from_millis(500),
            search_batch_size: 100,
            sink_retry: RetryConfig::default(),
            timezone: chrono_tz::Australia::Melbourne,
        }
    }
}

/// Result of applying one expert's outcome
enum Resolution {
    Updated(ExpertRecord),
    Failed {
        reason: String,
        details: Option<String>,
    },
}

/// Orchestrates availability refreshes
pub struct AvailabilitySync<D: Database> {
    database: Arc<D>,
    provider: Arc<dyn AvailabilityProvider>,
    sink: Arc<dyn SearchSink>,
    planner: Box<dyn BatchPlanner>,
    cache: Option<Arc<TtlCache<Vec<ExpertRecord>>>>,
    settings: SyncSettings,
    phase: watch::Sender<SyncPhase>,
    pass_lock: Mutex<()>,
}

impl<D: Database> AvailabilitySync<D> {
    /// Fails when the planner would emit batches the provider rejects
    pub fn new(
        database: Arc<D>,
        provider: Arc<dyn AvailabilityProvider>,
        sink: Arc<dyn SearchSink>,
        planner: Box<dyn BatchPlanner>,
        settings: SyncSettings,
    ) -> Result<Self, ValidationError> {
        if planner.max_batch_size() > provider.max_batch_size() {
            return Err(ValidationError::BatchTooLarge {
                size: planner.max_batch_size(),
                max: provider.max_batch_size(),
            });
        }

        Ok(Self {
            database,
            provider,
            sink,
            planner,
            cache: None,
            settings,
            phase: watch::channel(SyncPhase::Idle).0,
            pass_lock: Mutex::new(()),
        })
    }

    /// Invalidate `cache` after writes
    pub fn with_cache(mut self, cache: Arc<TtlCache<Vec<ExpertRecord>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub async fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Refresh every stored expert
    ///
    /// Never fails. Passes are serialised, so a manual trigger waits for a
    /// scheduled pass already in flight.
    pub async fn refresh_all(&self) -> SyncReport {
        self.run_pass(None).await
    }

    /// Refresh every stored expert, starting no batch after `deadline`
    ///
    /// Batches not started in time are counted in [`SyncReport::deferred`].
    /// Whatever was reconciled is still published and the cache cleared.
    pub async fn refresh_until(&self, deadline: Instant) -> SyncReport {
        self.run_pass(Some(deadline)).await
    }

    async fn run_pass(&self, deadline: Option<Instant>) -> SyncReport {
        let _pass = self.pass_lock.lock().await;
        let _idle = IdleOnDrop(&self.phase);
        let started = std::time::Instant::now();

        self.set_phase(SyncPhase::Planning);
        let experts = match self.database.list_experts().await {
            Ok(experts) => experts,
            Err(e) => {
                error!(error = %e, "Failed to load expert roster");
                return SyncReport::default();
            }
        };

        if experts.is_empty() {
            info!("No experts to refresh");
            return SyncReport::default();
        }

        let batches = self.planner.plan(&experts);
        let query = AvailabilityQuery::from_config(&self.settings.provider, Utc::now());
        let mut report = SyncReport {
            total: experts.len(),
            batches: batches.len(),
            ..Default::default()
        };

        info!(
            experts = report.total,
            batches = report.batches,
            "Starting availability refresh"
        );

        self.set_phase(SyncPhase::Fetching);
        let mut records = Vec::new();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.settings.inter_batch_delay.is_zero() {
                let mut wake = Instant::now() + self.settings.inter_batch_delay;
                if let Some(deadline) = deadline {
                    wake = wake.min(deadline);
                }
                tokio::time::sleep_until(wake).await;
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                report.deferred = batches[index..].iter().map(Vec::len).sum();
                warn!(
                    deferred = report.deferred,
                    batches_left = batches.len() - index,
                    "Pass deadline reached, deferring remaining batches"
                );
                break;
            }

            let (processed, failed) = self.process_batch(index, batch, &query, &mut records).await;
            report.processed += processed;
            report.failed += failed;
        }

        self.set_phase(SyncPhase::Publishing);
        self.publish(&records).await;
        self.invalidate_cache().await;
        self.set_phase(SyncPhase::Idle);

        info!(
            total = report.total,
            processed = report.processed,
            failed = report.failed,
            deferred = report.deferred,
            batches = report.batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Availability refresh completed"
        );

        report
    }

    /// Refresh one stored expert on demand
    ///
    /// Provider failures come back as an unsuccessful outcome and are
    /// ledgered. Store failures propagate.
    pub async fn refresh_one(&self, uid: &str) -> Result<RefreshOutcome, AppError> {
        let expert = self
            .database
            .get_expert_by_uid(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(uid.to_string()))?;

        let query = AvailabilityQuery::from_config(&self.settings.provider, Utc::now());
        let checked_at = Utc::now();
        let previous = expert.earliest_available_unix;

        let outcome = match fetch_for(self.provider.as_ref(), std::slice::from_ref(&expert), &query).await {
            Ok(result) => outcome_for(&result, &expert),
            Err(err) => {
                warn!(uid = %uid, error = %err, "Provider request failed for single refresh");
                ExpertOutcome::ProviderError {
                    reason: err.reason().to_string(),
                    details: Some(err.to_string()),
                }
            }
        };

        match self.apply_outcome(&expert, &outcome, checked_at).await? {
            Resolution::Updated(updated) => {
                self.publish(&[search_record(&updated, checked_at)]).await;
                self.invalidate_cache().await;
                Ok(RefreshOutcome {
                    bubble_uid: updated.bubble_uid,
                    success: true,
                    previous_earliest_unix: previous,
                    new_earliest_unix: updated.earliest_available_unix,
                    changed: previous != updated.earliest_available_unix,
                    reason: None,
                    details: None,
                    checked_at,
                })
            }
            Resolution::Failed { reason, details } => Ok(RefreshOutcome {
                bubble_uid: expert.bubble_uid,
                success: false,
                previous_earliest_unix: previous,
                new_earliest_unix: previous,
                changed: false,
                reason: Some(reason),
                details,
                checked_at,
            }),
        }
    }

    /// Query availability for an unstored provider id; persists nothing
    pub async fn lookup(&self, target: &AdHocTarget) -> Result<AvailabilityLookup, AppError> {
        let query = AvailabilityQuery::from_config(&self.settings.provider, Utc::now());
        let result = fetch_for(self.provider.as_ref(), std::slice::from_ref(target), &query).await?;

        let (earliest, error) = match result.experts.first().map(|e| &e.outcome) {
            Some(ExpertOutcome::Available { earliest_unix }) => (*earliest_unix, None),
            Some(ExpertOutcome::ProviderError { reason, details }) => (
                None,
                Some(details.clone().unwrap_or_else(|| reason.clone())),
            ),
            Some(ExpertOutcome::ProcessingError { details }) => (None, Some(details.clone())),
            None => (None, None),
        };

        Ok(AvailabilityLookup {
            cronofy_id: target.provider_id().to_string(),
            earliest_available_unix: earliest,
            error,
            slots: result.slots,
        })
    }

    async fn process_batch(
        &self,
        index: usize,
        batch: &[ExpertRecord],
        query: &AvailabilityQuery,
        records: &mut Vec<SearchRecord>,
    ) -> (usize, usize) {
        let members: Vec<BatchMember> = batch.iter().map(BatchMember::from_target).collect();
        let checked_at = Utc::now();
        let mut processed = 0;
        let mut failed = 0;

        debug!(batch = index, members = members.len(), "Querying provider");

        let result = match self.provider.fetch_batch(&members, query).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    batch = index,
                    members = members.len(),
                    error = %err,
                    "Provider batch failed"
                );
                self.fail_batch(batch, &err).await;
                return (0, batch.len());
            }
        };

        for expert in batch {
            let outcome = outcome_for(&result, expert);
            match self.apply_outcome(expert, &outcome, checked_at).await {
                Ok(Resolution::Updated(updated)) => {
                    records.push(search_record(&updated, checked_at));
                    processed += 1;
                }
                Ok(Resolution::Failed { .. }) => failed += 1,
                Err(e) => {
                    error!(uid = %expert.bubble_uid, error = %e, "Failed to store availability");
                    self.record_failure(expert, REASON_PROCESSING_ERROR, Some(e.to_string()))
                        .await;
                    failed += 1;
                }
            }
        }

        debug!(batch = index, processed, failed, "Batch reconciled");
        (processed, failed)
    }

    async fn fail_batch(&self, batch: &[ExpertRecord], err: &ProviderError) {
        for expert in batch {
            self.record_failure(expert, err.reason(), Some(err.to_string()))
                .await;
        }
    }

    /// Ledger failures, persist successes; only store errors escape
    async fn apply_outcome(
        &self,
        expert: &ExpertRecord,
        outcome: &ExpertOutcome,
        checked_at: DateTime<Utc>,
    ) -> Result<Resolution, DbError> {
        match outcome {
            ExpertOutcome::Available { earliest_unix } => {
                let updated = self
                    .database
                    .update_availability_versioned(
                        &expert.bubble_uid,
                        expert.version,
                        *earliest_unix,
                        checked_at,
                    )
                    .await?;
                self.clear_failure(&expert.bubble_uid).await;
                Ok(Resolution::Updated(updated))
            }
            ExpertOutcome::ProviderError { reason, details } => {
                self.record_failure(expert, reason, details.clone()).await;
                Ok(Resolution::Failed {
                    reason: reason.clone(),
                    details: details.clone(),
                })
            }
            ExpertOutcome::ProcessingError { details } => {
                self.record_failure(expert, REASON_PROCESSING_ERROR, Some(details.clone()))
                    .await;
                Ok(Resolution::Failed {
                    reason: REASON_PROCESSING_ERROR.to_string(),
                    details: Some(details.clone()),
                })
            }
        }
    }

    async fn record_failure(&self, expert: &ExpertRecord, reason: &str, details: Option<String>) {
        let failure = AvailabilityFailure::new(
            &expert.bubble_uid,
            &expert.expert_name,
            &expert.cronofy_id,
            reason,
            details,
            self.settings.timezone,
        );

        if let Err(e) = self.database.log_availability_error(&failure).await {
            error!(
                uid = %expert.bubble_uid,
                reason = %reason,
                error = %e,
                "Failed to write availability error ledger entry"
            );
        }
    }

    async fn clear_failure(&self, uid: &str) {
        if let Err(e) = self.database.clear_availability_error(uid).await {
            warn!(uid = %uid, error = %e, "Failed to clear availability error ledger entry");
        }
    }

    async fn publish(&self, records: &[SearchRecord]) {
        if records.is_empty() {
            return;
        }

        let sink = self.sink.as_ref();
        for chunk in records.chunks(self.settings.search_batch_size.max(1)) {
            match with_retry(&self.settings.sink_retry, move || sink.push(chunk)).await {
                Ok(()) => debug!(records = chunk.len(), "Published availability to search sink"),
                Err(e) => error!(
                    records = chunk.len(),
                    error = %e,
                    "Failed to publish availability to search sink"
                ),
            }
        }
    }

    async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }
}

/// Returns the phase to idle when a pass ends, including a dropped one
struct IdleOnDrop<'a>(&'a watch::Sender<SyncPhase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SyncPhase::Idle);
    }
}

fn outcome_for(result: &BatchAvailability, expert: &ExpertRecord) -> ExpertOutcome {
    match result.for_uid(&expert.bubble_uid) {
        Some(entry) => entry.outcome.clone(),
        None => ExpertOutcome::ProcessingError {
            details: format!(
                "No result returned for provider id {}",
                expert.cronofy_id
            ),
        },
    }
}

fn search_record(expert: &ExpertRecord, checked_at: DateTime<Utc>) -> SearchRecord {
    SearchRecord {
        object_id: expert.bubble_uid.clone(),
        expert_name: expert.expert_name.clone(),
        cronofy_id: expert.cronofy_id.clone(),
        earliest_available_unix: expert.earliest_available_unix,
        availability_last_updated: checked_at.to_rfc3339(),
    }
}
