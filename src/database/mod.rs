//! Database layer for expert-availability
//!
//! This module defines the database trait and SQLite implementation. The
//! trait covers two stores: the expert record store, with optimistic-lock
//! versioning, and the availability error ledger.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{AvailabilityErrorEntry, AvailabilityFailure, ExpertRecord, NewExpert};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the application.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Expert record operations
    // =========================================================================

    /// Create the expert at version 0, or overwrite name, provider id and
    /// calendars of the existing one and bump its version
    async fn upsert_expert(&self, expert: &NewExpert) -> Result<ExpertRecord, DbError>;

    async fn get_expert_by_uid(&self, uid: &str) -> Result<Option<ExpertRecord>, DbError>;

    async fn get_expert_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<ExpertRecord>, DbError>;

    /// All experts, most recently updated first
    async fn list_experts(&self) -> Result<Vec<ExpertRecord>, DbError>;

    async fn count_experts(&self) -> Result<u64, DbError>;

    /// Returns the deleted record, or None if absent
    async fn delete_expert_by_uid(&self, uid: &str) -> Result<Option<ExpertRecord>, DbError>;

    /// Returns the deleted record, or None if absent
    async fn delete_expert_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<ExpertRecord>, DbError>;

    /// Store an availability result, reading the current version first
    async fn update_availability(
        &self,
        uid: &str,
        earliest_unix: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<ExpertRecord, DbError>;

    /// Store an availability result against a version the caller already holds
    ///
    /// The write is conditional on `(uid, version)`. A lost race reloads the
    /// record and retries exactly once; a second collision is logged, not
    /// returned. The stored record is reloaded and returned in every case so
    /// callers can resynchronise their in-memory version.
    async fn update_availability_versioned(
        &self,
        uid: &str,
        expected_version: i64,
        earliest_unix: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<ExpertRecord, DbError>;

    // =========================================================================
    // Error ledger operations
    // =========================================================================

    /// Upsert keyed by uid; repeat failures overwrite in place
    async fn log_availability_error(&self, failure: &AvailabilityFailure) -> Result<(), DbError>;

    /// Idempotent; returns whether an entry was removed
    async fn clear_availability_error(&self, uid: &str) -> Result<bool, DbError>;

    /// Most recently updated first
    async fn list_availability_errors(&self) -> Result<Vec<AvailabilityErrorEntry>, DbError>;

    async fn get_availability_error(
        &self,
        uid: &str,
    ) -> Result<Option<AvailabilityErrorEntry>, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ExpertRecord {
        let now = Utc::now();
        ExpertRecord {
            id: 1,
            bubble_uid: "uid_1".to_string(),
            cronofy_id: "crn_1".to_string(),
            expert_name: "Ada".to_string(),
            calendar_ids: vec!["cal_1".to_string()],
            earliest_available_unix: None,
            last_availability_check: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // Test 1: MockDatabase can be created and used
    #[tokio::test]
    async fn test_mock_database_get_expert() {
        let mut mock = MockDatabase::new();

        mock.expect_get_expert_by_uid()
            .withf(|uid| uid == "uid_1")
            .returning(|_| Ok(Some(sample_record())));

        let result = mock.get_expert_by_uid("uid_1").await.unwrap();
        assert_eq!(result.unwrap().cronofy_id, "crn_1");
    }

    // Test 2: MockDatabase can surface errors
    #[tokio::test]
    async fn test_mock_database_error() {
        let mut mock = MockDatabase::new();

        mock.expect_clear_availability_error()
            .returning(|_| Err(DbError::Connection("closed".to_string())));

        let result = mock.clear_availability_error("uid_1").await;
        assert!(matches!(result, Err(DbError::Connection(_))));
    }
}
