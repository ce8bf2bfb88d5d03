//! Expert roster models
//!
//! This module defines the stored expert record, the validated input used to
//! create or update one, and the lightweight target trait the provider client
//! accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Prefix for the uid of an ad hoc single-shot query
pub const AD_HOC_UID_PREFIX: &str = "temp_";

/// A stored expert and its cached availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertRecord {
    /// Database ID
    pub id: i64,

    /// External-system UID, primary lookup key
    pub bubble_uid: String,

    /// Provider subject id, used to address the provider and reconcile results
    pub cronofy_id: String,

    /// Display name
    pub expert_name: String,

    /// Ordered, deduplicated, non-empty calendar ids
    pub calendar_ids: Vec<String>,

    /// Earliest free slot found, or null if none/unknown
    pub earliest_available_unix: Option<i64>,

    /// Last sync attempt that produced a value
    pub last_availability_check: Option<DateTime<Utc>>,

    /// Optimistic concurrency token
    pub version: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Raw expert submission as received from callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertInput {
    pub expert_name: String,
    pub cronofy_id: String,
    pub calendar_ids: Vec<String>,
    pub bubble_uid: String,
}

/// Validated, normalised expert data ready to upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpert {
    pub expert_name: String,
    pub cronofy_id: String,
    pub calendar_ids: Vec<String>,
    pub bubble_uid: String,
}

impl NewExpert {
    /// Validate and normalise an expert submission
    ///
    /// Strings are trimmed and must be non-empty. Calendar ids are trimmed,
    /// blanks dropped and duplicates removed keeping the first occurrence.
    pub fn new(
        expert_name: impl AsRef<str>,
        cronofy_id: impl AsRef<str>,
        calendar_ids: &[String],
        bubble_uid: impl AsRef<str>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            expert_name: required(expert_name.as_ref(), "expert_name")?,
            cronofy_id: required(cronofy_id.as_ref(), "cronofy_id")?,
            calendar_ids: normalize_calendar_ids(calendar_ids)?,
            bubble_uid: required(bubble_uid.as_ref(), "bubble_uid")?,
        })
    }
}

impl TryFrom<ExpertInput> for NewExpert {
    type Error = ValidationError;

    fn try_from(input: ExpertInput) -> Result<Self, Self::Error> {
        NewExpert::new(
            &input.expert_name,
            &input.cronofy_id,
            &input.calendar_ids,
            &input.bubble_uid,
        )
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Trim, drop blanks, and deduplicate calendar ids preserving order
pub fn normalize_calendar_ids(ids: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut normalized: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if !id.is_empty() && !normalized.iter().any(|existing| existing == id) {
            normalized.push(id.to_string());
        }
    }

    if normalized.is_empty() {
        return Err(ValidationError::EmptyCalendarIds);
    }
    Ok(normalized)
}

/// Anything the provider client can query availability for
pub trait AvailabilityTarget {
    /// Provider subject id
    fn provider_id(&self) -> &str;

    fn calendar_ids(&self) -> &[String];

    /// Caller identity joined onto returned slots
    fn uid(&self) -> &str;
}

impl AvailabilityTarget for ExpertRecord {
    fn provider_id(&self) -> &str {
        &self.cronofy_id
    }

    fn calendar_ids(&self) -> &[String] {
        &self.calendar_ids
    }

    fn uid(&self) -> &str {
        &self.bubble_uid
    }
}

/// Single-shot query target that is not backed by a stored record
///
/// The uid is synthetic (`temp_<provider id>`) and only used to enrich slot
/// participants in the response. It is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHocTarget {
    provider_id: String,
    calendar_ids: Vec<String>,
    uid: String,
}

impl AdHocTarget {
    pub fn for_provider(
        provider_id: impl AsRef<str>,
        calendar_ids: &[String],
    ) -> Result<Self, ValidationError> {
        let provider_id = required(provider_id.as_ref(), "cronofy_id")?;
        Ok(Self {
            uid: format!("{}{}", AD_HOC_UID_PREFIX, provider_id),
            calendar_ids: normalize_calendar_ids(calendar_ids)?,
            provider_id,
        })
    }
}

impl AvailabilityTarget for AdHocTarget {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn calendar_ids(&self) -> &[String] {
        &self.calendar_ids
    }

    fn uid(&self) -> &str {
        &self.uid
    }
}
