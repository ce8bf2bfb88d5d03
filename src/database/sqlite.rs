//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::Database;
use crate::error::DbError;
use crate::models::{AvailabilityErrorEntry, AvailabilityFailure, ExpertRecord, NewExpert};

const EXPERT_COLUMNS: &str = "id, bubble_uid, cronofy_id, expert_name, calendar_ids, \
     earliest_available_unix, last_availability_check, version, created_at, updated_at";

const ERROR_COLUMNS: &str = "bubble_uid, expert_name, cronofy_id, error_reason, error_details, \
     unix_timestamp, local_time, created_at, updated_at";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", migration_version())?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }

    /// Schema version recorded in the database file
    pub async fn schema_version(&self) -> Result<i32, DbError> {
        self.conn
            .call(|conn| {
                let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
                Ok(version)
            })
            .await
            .map_err(Into::into)
    }

    /// Conditional write matched on `(uid, version)`; true if a row changed
    async fn write_availability_if_version(
        &self,
        uid: &str,
        version: i64,
        earliest_unix: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let uid = uid.to_string();
        let checked_at = format_timestamp(checked_at);

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE experts
                    SET earliest_available_unix = ?1, last_availability_check = ?2,
                        version = version + 1, updated_at = ?3
                    WHERE bubble_uid = ?4 AND version = ?5
                    "#,
                    rusqlite::params![earliest_unix, checked_at, now_timestamp(), uid, version],
                )?;
                Ok(count)
            })
            .await?;

        Ok(rows_affected > 0)
    }

    async fn delete_expert_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<ExpertRecord>, DbError> {
        let value = value.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing = tx
                    .query_row(
                        &format!("SELECT {} FROM experts WHERE {} = ?1", EXPERT_COLUMNS, column),
                        [&value],
                        row_to_expert,
                    )
                    .optional()?;

                if let Some(record) = &existing {
                    tx.execute("DELETE FROM experts WHERE id = ?1", [record.id])?;
                }
                tx.commit()?;

                Ok(existing)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_expert_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<ExpertRecord>, DbError> {
        let value = value.to_string();

        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        &format!("SELECT {} FROM experts WHERE {} = ?1", EXPERT_COLUMNS, column),
                        [&value],
                        row_to_expert,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Expert record operations
    // =========================================================================

    async fn upsert_expert(&self, expert: &NewExpert) -> Result<ExpertRecord, DbError> {
        let bubble_uid = expert.bubble_uid.clone();
        let cronofy_id = expert.cronofy_id.clone();
        let expert_name = expert.expert_name.clone();
        let calendar_ids = serde_json::to_string(&expert.calendar_ids)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = now_timestamp();

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM experts WHERE bubble_uid = ?1",
                        [&bubble_uid],
                        |row| row.get(0),
                    )
                    .optional()?;

                match existing {
                    Some(id) => {
                        tx.execute(
                            r#"
                            UPDATE experts
                            SET expert_name = ?1, cronofy_id = ?2, calendar_ids = ?3,
                                version = version + 1, updated_at = ?4
                            WHERE id = ?5
                            "#,
                            rusqlite::params![expert_name, cronofy_id, calendar_ids, now, id],
                        )?;
                    }
                    None => {
                        tx.execute(
                            r#"
                            INSERT INTO experts
                            (bubble_uid, cronofy_id, expert_name, calendar_ids, version, created_at, updated_at)
                            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
                            "#,
                            rusqlite::params![bubble_uid, cronofy_id, expert_name, calendar_ids, now],
                        )?;
                    }
                }

                let record = tx.query_row(
                    &format!("SELECT {} FROM experts WHERE bubble_uid = ?1", EXPERT_COLUMNS),
                    [&bubble_uid],
                    row_to_expert,
                )?;
                tx.commit()?;

                Ok(record)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_expert_by_uid(&self, uid: &str) -> Result<Option<ExpertRecord>, DbError> {
        self.get_expert_where("bubble_uid", uid).await
    }

    async fn get_expert_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<ExpertRecord>, DbError> {
        self.get_expert_where("cronofy_id", provider_id).await
    }

    async fn list_experts(&self) -> Result<Vec<ExpertRecord>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM experts ORDER BY updated_at DESC, id DESC",
                    EXPERT_COLUMNS
                ))?;

                let experts = stmt
                    .query_map([], row_to_expert)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(experts)
            })
            .await
            .map_err(Into::into)
    }

    async fn count_experts(&self) -> Result<u64, DbError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM experts", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    async fn delete_expert_by_uid(&self, uid: &str) -> Result<Option<ExpertRecord>, DbError> {
        self.delete_expert_where("bubble_uid", uid).await
    }

    async fn delete_expert_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<ExpertRecord>, DbError> {
        self.delete_expert_where("cronofy_id", provider_id).await
    }

    async fn update_availability(
        &self,
        uid: &str,
        earliest_unix: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<ExpertRecord, DbError> {
        let current = self
            .get_expert_by_uid(uid)
            .await?
            .ok_or(DbError::NotFound)?;

        self.update_availability_versioned(uid, current.version, earliest_unix, checked_at)
            .await
    }

    async fn update_availability_versioned(
        &self,
        uid: &str,
        expected_version: i64,
        earliest_unix: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<ExpertRecord, DbError> {
        let applied = self
            .write_availability_if_version(uid, expected_version, earliest_unix, checked_at)
            .await?;

        if !applied {
            let current = self
                .get_expert_by_uid(uid)
                .await?
                .ok_or(DbError::NotFound)?;

            debug!(
                uid = uid,
                expected_version = expected_version,
                current_version = current.version,
                "Version conflict, reapplying availability update"
            );

            let reapplied = self
                .write_availability_if_version(uid, current.version, earliest_unix, checked_at)
                .await?;

            if !reapplied {
                warn!(
                    uid = uid,
                    version = current.version,
                    "Availability update collided twice, leaving concurrent write in place"
                );
            }
        }

        self.get_expert_by_uid(uid).await?.ok_or(DbError::NotFound)
    }

    // =========================================================================
    // Error ledger operations
    // =========================================================================

    async fn log_availability_error(&self, failure: &AvailabilityFailure) -> Result<(), DbError> {
        let bubble_uid = failure.bubble_uid.clone();
        let expert_name = failure.expert_name.clone();
        let cronofy_id = failure.cronofy_id.clone();
        let reason = failure.reason.clone();
        let details = failure.details.clone();
        let unix_timestamp = failure.unix_timestamp();
        let local_time = failure.local_time.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO availability_errors
                    (bubble_uid, expert_name, cronofy_id, error_reason, error_details,
                     unix_timestamp, local_time, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    ON CONFLICT(bubble_uid) DO UPDATE SET
                        expert_name = excluded.expert_name,
                        cronofy_id = excluded.cronofy_id,
                        error_reason = excluded.error_reason,
                        error_details = excluded.error_details,
                        unix_timestamp = excluded.unix_timestamp,
                        local_time = excluded.local_time,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![
                        bubble_uid,
                        expert_name,
                        cronofy_id,
                        reason,
                        details,
                        unix_timestamp,
                        local_time,
                        now_timestamp()
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn clear_availability_error(&self, uid: &str) -> Result<bool, DbError> {
        let uid = uid.to_string();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count =
                    conn.execute("DELETE FROM availability_errors WHERE bubble_uid = ?1", [&uid])?;
                Ok(count)
            })
            .await?;

        Ok(rows_affected > 0)
    }

    async fn list_availability_errors(&self) -> Result<Vec<AvailabilityErrorEntry>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM availability_errors ORDER BY updated_at DESC, rowid DESC",
                    ERROR_COLUMNS
                ))?;

                let entries = stmt
                    .query_map([], row_to_error_entry)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_availability_error(
        &self,
        uid: &str,
    ) -> Result<Option<AvailabilityErrorEntry>, DbError> {
        let uid = uid.to_string();

        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM availability_errors WHERE bubble_uid = ?1",
                            ERROR_COLUMNS
                        ),
                        [&uid],
                        row_to_error_entry,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }
}

fn row_to_expert(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExpertRecord> {
    let calendar_ids: String = row.get(4)?;
    let calendar_ids: Vec<String> = serde_json::from_str(&calendar_ids)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(ExpertRecord {
        id: row.get(0)?,
        bubble_uid: row.get(1)?,
        cronofy_id: row.get(2)?,
        expert_name: row.get(3)?,
        calendar_ids,
        earliest_available_unix: row.get(5)?,
        last_availability_check: parse_datetime(row.get::<_, Option<String>>(6)?),
        version: row.get(7)?,
        created_at: required_datetime(row, 8)?,
        updated_at: required_datetime(row, 9)?,
    })
}

fn row_to_error_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AvailabilityErrorEntry> {
    Ok(AvailabilityErrorEntry {
        bubble_uid: row.get(0)?,
        expert_name: row.get(1)?,
        cronofy_id: row.get(2)?,
        error_reason: row.get(3)?,
        error_details: row.get(4)?,
        unix_timestamp: row.get(5)?,
        local_time: row.get(6)?,
        created_at: required_datetime(row, 7)?,
        updated_at: required_datetime(row, 8)?,
    })
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn required_datetime(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
