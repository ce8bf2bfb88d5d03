//! Availability synchronization infrastructure
//!
//! This module provides the refresh pipeline: batching, provider calls with
//! retry and rate limiting, reconciliation into the record store, and the
//! periodic trigger.
//!
//! # Components
//!
//! - [`retry`]: Retry manager with exponential backoff for handling transient failures
//! - [`http_client`]: Rate-limited HTTP client for provider calls
//! - [`planner`]: Splits the roster into provider-compliant batches
//! - [`orchestrator`]: Runs full and single-expert refreshes
//! - [`scheduler`]: Periodic refresh trigger
//!
//! # Example
//!
//! ```ignore
//! use expert_availability::sync::{AvailabilitySync, RefreshScheduler, SchedulerConfig};
//!
//! let sync = Arc::new(AvailabilitySync::new(db, provider, sink, planner, settings)?);
//! let scheduler = RefreshScheduler::new(SchedulerConfig::default(), sync.clone(), shutdown_rx);
//! tokio::spawn(scheduler.run());
//!
//! let report = sync.refresh_all().await;
//! ```

pub mod http_client;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod scheduler;

// Re-export main types for convenience
pub use http_client::HttpClientWithRateLimit;
pub use orchestrator::{AvailabilitySync, SyncPhase, SyncSettings};
pub use planner::{planner_from_config, BatchPlanner, CalendarCountPlanner, PositionalPlanner};
pub use retry::{with_retry, RetryManager};
pub use scheduler::{
    Refreshable, RefreshScheduler, SchedulerConfig, SchedulerStatus, SharedSchedulerStatus,
};
