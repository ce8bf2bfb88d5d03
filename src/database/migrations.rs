//! Database migrations for expert-availability
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Expert records with cached availability
CREATE TABLE IF NOT EXISTS experts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bubble_uid TEXT NOT NULL UNIQUE,
    cronofy_id TEXT NOT NULL UNIQUE,
    expert_name TEXT NOT NULL,
    calendar_ids TEXT NOT NULL,
    earliest_available_unix INTEGER,
    last_availability_check TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_experts_updated ON experts(updated_at DESC);

-- Current availability failures, one per expert
CREATE TABLE IF NOT EXISTS availability_errors (
    bubble_uid TEXT PRIMARY KEY,
    expert_name TEXT NOT NULL,
    cronofy_id TEXT NOT NULL,
    error_reason TEXT NOT NULL,
    error_details TEXT,
    unix_timestamp INTEGER NOT NULL,
    local_time TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_availability_errors_updated ON availability_errors(updated_at DESC);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
