//! Cronofy availability client
//!
//! Builds one availability query per batch, sends it through the shared
//! rate-limited HTTP client under the retry policy, and reconciles the
//! returned slots into per-expert earliest times.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::AvailabilityProvider;
use crate::config::{ProviderConfig, PROVIDER_MAX_MEMBERS};
use crate::error::{ProviderError, ValidationError};
use crate::models::{
    AvailabilityQuery, AvailableSlot, BatchAvailability, BatchMember, ExpertAvailability,
    ExpertOutcome, SlotParticipant, REASON_PROVIDER_ERROR,
};
use crate::sync::http_client::HttpClientWithRateLimit;
use crate::sync::retry::with_retry;

/// Raw response shape; converted before leaving this module
#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    available_slots: Vec<RawSlot>,
    /// Participants the provider could not evaluate
    #[serde(default)]
    errors: Vec<RawParticipantError>,
}

#[derive(Debug, Deserialize)]
struct RawSlot {
    start: String,
    end: String,
    #[serde(default)]
    participants: Vec<RawParticipant>,
}

#[derive(Debug, Deserialize)]
struct RawParticipant {
    sub: String,
}

#[derive(Debug, Deserialize)]
struct RawParticipantError {
    sub: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Cronofy availability API client
pub struct CronofyClient {
    http: HttpClientWithRateLimit,
    config: ProviderConfig,
}

impl CronofyClient {
    /// Create a client that shares `http` (and its rate-limit state)
    pub fn new(http: HttpClientWithRateLimit, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    fn access_token(&self) -> Option<&str> {
        self.config
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Build the availability request body for one batch
    pub fn build_request(members: &[BatchMember], query: &AvailabilityQuery) -> Value {
        let members: Vec<Value> = members
            .iter()
            .map(|m| {
                json!({
                    "sub": m.sub,
                    "calendar_ids": m.calendar_ids,
                    "managed_availability": true,
                })
            })
            .collect();

        json!({
            "participants": [{ "members": members, "required": 1 }],
            "query_periods": [{
                "start": query.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "end": query.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            }],
            "required_duration": { "minutes": query.duration_minutes },
            "buffer": {
                "before": { "minutes": query.buffer_before_minutes },
                "after": { "minutes": query.buffer_after_minutes },
            },
            "max_results": query.max_results,
            "response_format": "slots",
        })
    }
}

#[async_trait]
impl AvailabilityProvider for CronofyClient {
    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size.min(PROVIDER_MAX_MEMBERS)
    }

    fn is_configured(&self) -> bool {
        self.access_token().is_some()
    }

    async fn fetch_batch(
        &self,
        members: &[BatchMember],
        query: &AvailabilityQuery,
    ) -> Result<BatchAvailability, ProviderError> {
        if members.is_empty() {
            return Ok(BatchAvailability::default());
        }
        if members.len() > self.max_batch_size() {
            return Err(ValidationError::BatchTooLarge {
                size: members.len(),
                max: self.max_batch_size(),
            }
            .into());
        }

        let Some(token) = self.access_token() else {
            warn!(
                experts = members.len(),
                "Provider access token not set, returning unknown availability"
            );
            return Ok(BatchAvailability::unknown(members));
        };

        let body = Self::build_request(members, query);
        let body = &body;
        let url = self.config.api_url.as_str();
        let http = &self.http;
        let timeout = Duration::from_secs(self.config.request_timeout_secs);

        debug!(experts = members.len(), "Requesting availability");
        let raw = with_retry(&self.config.retry, move || {
            http.post_json(url, token, body, timeout)
        })
        .await?;

        let batch = reconcile(members, raw)?;
        info!(
            experts = members.len(),
            slots = batch.slots.len(),
            "Availability batch reconciled"
        );
        Ok(batch)
    }
}

/// Resolve each member's earliest slot from a raw provider response
///
/// For each member, the earliest `start` among slots that list its subject
/// id wins regardless of array order. Members absent from every slot resolve
/// to `None`. Participants listed in the response's `errors` array resolve
/// to a provider error. Slot participants are enriched with the member uid.
pub fn reconcile(members: &[BatchMember], raw: Value) -> Result<BatchAvailability, ProviderError> {
    let response: AvailabilityResponse = serde_json::from_value(raw).map_err(|e| {
        ProviderError::InvalidResponse(format!("Unexpected availability response: {}", e))
    })?;

    let uid_by_sub: HashMap<&str, &str> = members
        .iter()
        .map(|m| (m.sub.as_str(), m.uid.as_str()))
        .collect();

    let errors: HashMap<&str, &RawParticipantError> = response
        .errors
        .iter()
        .map(|e| (e.sub.as_str(), e))
        .collect();

    // Earliest start per subject; ISO-8601 UTC strings order chronologically
    let mut earliest: HashMap<&str, &str> = HashMap::new();
    for slot in &response.available_slots {
        let subs: HashSet<&str> = slot.participants.iter().map(|p| p.sub.as_str()).collect();
        for sub in subs {
            earliest
                .entry(sub)
                .and_modify(|current| {
                    if slot.start.as_str() < *current {
                        *current = slot.start.as_str();
                    }
                })
                .or_insert(slot.start.as_str());
        }
    }

    let experts = members
        .iter()
        .map(|m| {
            let outcome = match errors.get(m.sub.as_str()) {
                Some(err) => ExpertOutcome::ProviderError {
                    reason: REASON_PROVIDER_ERROR.to_string(),
                    details: participant_error_details(err),
                },
                None => match earliest.get(m.sub.as_str()) {
                    None => ExpertOutcome::Available {
                        earliest_unix: None,
                    },
                    Some(start) => match DateTime::parse_from_rfc3339(start) {
                        Ok(dt) => ExpertOutcome::Available {
                            earliest_unix: Some(dt.timestamp()),
                        },
                        Err(e) => ExpertOutcome::ProcessingError {
                            details: format!("Unparseable slot start {:?}: {}", start, e),
                        },
                    },
                },
            };

            ExpertAvailability {
                uid: m.uid.clone(),
                sub: m.sub.clone(),
                outcome,
            }
        })
        .collect();

    let slots = response
        .available_slots
        .into_iter()
        .map(|slot| AvailableSlot {
            participants: slot
                .participants
                .into_iter()
                .map(|p| SlotParticipant {
                    uid: uid_by_sub.get(p.sub.as_str()).map(|u| u.to_string()),
                    sub: p.sub,
                })
                .collect(),
            start: slot.start,
            end: slot.end,
        })
        .collect();

    Ok(BatchAvailability { experts, slots })
}

fn participant_error_details(err: &RawParticipantError) -> Option<String> {
    match (&err.key, &err.description) {
        (Some(key), Some(description)) => Some(format!("{}: {}", key, description)),
        (Some(key), None) => Some(key.clone()),
        (None, Some(description)) => Some(description.clone()),
        (None, None) => None,
    }
}
