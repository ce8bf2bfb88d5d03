//! Availability query and result models
//!
//! Typed shapes that cross the provider client boundary. Nothing past the
//! client sees the provider's raw JSON.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::expert::AvailabilityTarget;
use crate::config::ProviderConfig;

/// Meeting constraints and time window for one availability query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: u32,
    pub buffer_before_minutes: u32,
    pub buffer_after_minutes: u32,
    pub max_results: u32,
}

impl AvailabilityQuery {
    /// Query covering `now` through `now + query_window_days`
    pub fn from_config(config: &ProviderConfig, now: DateTime<Utc>) -> Self {
        Self {
            start: now,
            end: now + Duration::days(config.query_window_days),
            duration_minutes: config.duration_minutes,
            buffer_before_minutes: config.buffer_before_minutes,
            buffer_after_minutes: config.buffer_after_minutes,
            max_results: config.max_results,
        }
    }
}

/// One member of a provider batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMember {
    /// Provider subject id
    pub sub: String,
    pub calendar_ids: Vec<String>,
    pub uid: String,
}

impl BatchMember {
    pub fn from_target<T: AvailabilityTarget + ?Sized>(target: &T) -> Self {
        Self {
            sub: target.provider_id().to_string(),
            calendar_ids: target.calendar_ids().to_vec(),
            uid: target.uid().to_string(),
        }
    }
}

/// Slot participant, enriched with the caller's uid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotParticipant {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A concrete free interval returned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub participants: Vec<SlotParticipant>,
}

/// Per-expert result of one provider batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpertOutcome {
    /// Earliest qualifying slot, or `None` when there is none or it is unknown
    Available { earliest_unix: Option<i64> },

    /// The provider flagged this participant
    ProviderError {
        reason: String,
        details: Option<String>,
    },

    /// The participant's result could not be processed locally
    ProcessingError { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpertAvailability {
    pub uid: String,
    pub sub: String,
    pub outcome: ExpertOutcome,
}

/// Reconciled response for a whole batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchAvailability {
    /// One entry per batch member, in request order
    pub experts: Vec<ExpertAvailability>,

    /// Returned slots with enriched participants
    pub slots: Vec<AvailableSlot>,
}

impl BatchAvailability {
    /// Every member resolves to unknown availability
    pub fn unknown(members: &[BatchMember]) -> Self {
        Self {
            experts: members
                .iter()
                .map(|m| ExpertAvailability {
                    uid: m.uid.clone(),
                    sub: m.sub.clone(),
                    outcome: ExpertOutcome::Available {
                        earliest_unix: None,
                    },
                })
                .collect(),
            slots: Vec::new(),
        }
    }

    pub fn for_uid(&self, uid: &str) -> Option<&ExpertAvailability> {
        self.experts.iter().find(|e| e.uid == uid)
    }
}

/// Aggregate counts for one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Experts in the roster
    pub total: usize,
    /// Experts whose record was updated
    pub processed: usize,
    pub failed: usize,
    pub batches: usize,
    /// Experts in batches skipped because the pass deadline passed
    #[serde(default)]
    pub deferred: usize,
}

/// Result of refreshing a single expert on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub bubble_uid: String,
    pub success: bool,
    pub previous_earliest_unix: Option<i64>,
    pub new_earliest_unix: Option<i64>,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Result of a single-shot query for an unstored provider id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityLookup {
    pub cronofy_id: String,
    pub earliest_available_unix: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub slots: Vec<AvailableSlot>,
}

/// Partial-update record pushed to the search index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub expert_name: String,
    pub cronofy_id: String,
    pub earliest_available_unix: Option<i64>,
    pub availability_last_updated: String,
}
