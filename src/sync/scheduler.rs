//! Periodic refresh trigger
//!
//! Runs one full availability pass at startup and then on a fixed interval
//! until shutdown is signalled. Passes never overlap: the next tick is only
//! awaited once the current pass has finished.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SchedulerSettings;
use crate::database::Database;
use crate::models::SyncReport;
use crate::sync::orchestrator::AvailabilitySync;

/// Configuration for the refresh scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before the startup pass
    pub initial_delay: Duration,
    /// Time between pass starts
    pub interval: Duration,
    /// Budget for one pass; no batch starts once it is spent
    pub pass_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(5 * 60),
            pass_timeout: Duration::from_secs(1800),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            initial_delay: Duration::from_secs(settings.initial_delay_secs),
            interval: Duration::from_secs(settings.interval_minutes.max(1) * 60),
            pass_timeout: Duration::from_secs(settings.pass_timeout_secs),
        }
    }
}

/// Status of the periodic trigger
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    /// Whether the scheduler loop is alive
    pub running: bool,
    pub in_progress: bool,
    /// Completed passes
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub last_error: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Shared, readable scheduler status
pub type SharedSchedulerStatus = Arc<RwLock<SchedulerStatus>>;

/// Anything that can run a full refresh pass
#[async_trait]
pub trait Refreshable: Send + Sync {
    /// Run one pass, starting no new work after `deadline`
    async fn refresh(&self, deadline: Instant) -> SyncReport;
}

#[async_trait]
impl<D: Database + 'static> Refreshable for AvailabilitySync<D> {
    async fn refresh(&self, deadline: Instant) -> SyncReport {
        self.refresh_until(deadline).await
    }
}

/// Periodic availability refresh scheduler
pub struct RefreshScheduler {
    config: SchedulerConfig,
    target: Arc<dyn Refreshable>,
    status: SharedSchedulerStatus,
    shutdown_rx: broadcast::Receiver<()>,
}

impl RefreshScheduler {
    pub fn new(
        config: SchedulerConfig,
        target: Arc<dyn Refreshable>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            target,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_rx,
        }
    }

    /// Handle for reading status while the scheduler runs
    pub fn status(&self) -> SharedSchedulerStatus {
        self.status.clone()
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting availability refresh scheduler"
        );
        self.status.write().await.running = true;

        if !self.config.initial_delay.is_zero() {
            debug!(
                delay_secs = self.config.initial_delay.as_secs(),
                "Waiting for initial delay"
            );
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    self.stop().await;
                    return;
                }
                _ = tokio::time::sleep(self.config.initial_delay) => {}
            }
        }

        info!("Performing startup availability refresh");
        self.perform_refresh().await;

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping refresh scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    info!("Performing scheduled availability refresh");
                    self.perform_refresh().await;
                }
            }
        }

        self.stop().await;
    }

    async fn perform_refresh(&self) {
        self.status.write().await.in_progress = true;

        let report = self
            .target
            .refresh(Instant::now() + self.config.pass_timeout)
            .await;

        let mut status = self.status.write().await;
        status.in_progress = false;
        status.runs += 1;
        status.last_run = Some(Utc::now());
        status.next_run = chrono::Duration::from_std(self.config.interval)
            .ok()
            .map(|d| Utc::now() + d);

        if report.deferred > 0 {
            error!(
                timeout_secs = self.config.pass_timeout.as_secs(),
                deferred = report.deferred,
                "Availability refresh ran out of time"
            );
            status.last_error = Some(format!(
                "Availability refresh timed out; {} experts deferred",
                report.deferred
            ));
        } else {
            debug!(
                processed = report.processed,
                failed = report.failed,
                "Scheduled refresh finished"
            );
            status.last_error = None;
        }
        status.last_report = Some(report);
    }

    async fn stop(&self) {
        let mut status = self.status.write().await;
        status.running = false;
        status.next_run = None;
        info!("Refresh scheduler stopped");
    }
}
