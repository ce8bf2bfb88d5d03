//! Error ledger models
//!
//! One outstanding failure per expert, keyed by UID.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Classifier for a participant the provider explicitly flagged
pub const REASON_PROVIDER_ERROR: &str = "provider_error";

/// Classifier for a local failure while handling an expert's result
pub const REASON_PROCESSING_ERROR: &str = "processing_error";

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// A stored ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityErrorEntry {
    pub bubble_uid: String,

    /// Denormalised for display
    pub expert_name: String,

    /// Denormalised for display
    pub cronofy_id: String,

    /// Short classifier
    pub error_reason: String,

    /// Long-form detail
    pub error_details: Option<String>,

    /// Epoch seconds of occurrence
    pub unix_timestamp: i64,

    /// Occurrence rendered in the configured zone
    pub local_time: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A failure about to be written to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityFailure {
    pub bubble_uid: String,
    pub expert_name: String,
    pub cronofy_id: String,
    pub reason: String,
    pub details: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub local_time: String,
}

impl AvailabilityFailure {
    /// Create a failure stamped with the current time
    pub fn new(
        bubble_uid: impl Into<String>,
        expert_name: impl Into<String>,
        cronofy_id: impl Into<String>,
        reason: impl Into<String>,
        details: Option<String>,
        tz: Tz,
    ) -> Self {
        Self::at(
            bubble_uid,
            expert_name,
            cronofy_id,
            reason,
            details,
            Utc::now(),
            tz,
        )
    }

    /// Create a failure stamped with a given time
    pub fn at(
        bubble_uid: impl Into<String>,
        expert_name: impl Into<String>,
        cronofy_id: impl Into<String>,
        reason: impl Into<String>,
        details: Option<String>,
        occurred_at: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        Self {
            bubble_uid: bubble_uid.into(),
            expert_name: expert_name.into(),
            cronofy_id: cronofy_id.into(),
            reason: reason.into(),
            details,
            local_time: render_local_time(occurred_at, tz),
            occurred_at,
        }
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.occurred_at.timestamp()
    }
}

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS <zone abbreviation>`
pub fn render_local_time(at: DateTime<Utc>, tz: Tz) -> String {
    tz.from_utc_datetime(&at.naive_utc())
        .format(LOCAL_TIME_FORMAT)
        .to_string()
}
