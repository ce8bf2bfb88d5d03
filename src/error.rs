//! Application error types for expert-availability
//!
//! This module defines the error taxonomy used by the sync engine and its
//! collaborators. All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::config::ConfigError;

/// Input shape errors, always surfaced synchronously and never retried
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A required string field was blank after trimming
    #[error("Field must not be empty: {0}")]
    EmptyField(&'static str),

    /// Calendar id set was empty after normalisation
    #[error("calendar_ids must contain at least one non-empty calendar id")]
    EmptyCalendarIds,

    /// Batch size exceeds the provider participant limit
    #[error("Batch size {size} exceeds provider limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Batch size of zero
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    /// The same key appears more than once in a bulk submission
    #[error("Duplicate {field} in submission: {value}")]
    DuplicateKey { field: &'static str, value: String },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Background connection failure
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Column payload could not be encoded
    #[error("Database serialization error: {0}")]
    Serialization(String),
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => classify_sqlite(e),
            other => DbError::Connection(other.to_string()),
        }
    }
}

fn classify_sqlite(err: rusqlite::Error) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(code, msg)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::ConstraintViolation(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        _ => DbError::Sqlite(err),
    }
}

/// Errors raised while talking to the availability provider
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Request exceeded its wall-clock timeout
    #[error("Provider request timed out")]
    Timeout,

    /// Could not establish a connection
    #[error("Provider connection failed: {0}")]
    Connection(String),

    /// Any other transport-level failure
    #[error("Provider transport error: {0}")]
    Transport(String),

    /// Non-2xx response
    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be interpreted
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Request rejected before sending
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ProviderError {
    /// Short classifier recorded in the error ledger
    pub fn reason(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "provider_timeout",
            ProviderError::Connection(_) => "provider_connection",
            ProviderError::Transport(_) => "provider_transport",
            ProviderError::Status { .. } => "provider_status",
            ProviderError::InvalidResponse(_) => "provider_invalid_response",
            ProviderError::Validation(_) => "validation_error",
        }
    }
}

/// Errors raised by the search index sink
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    /// Transport failure
    #[error("Search sink request failed: {0}")]
    Request(String),

    /// Non-2xx response
    #[error("Search sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Database error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Provider error
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Search sink error
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Expert not found
    #[error("Expert not found: {0}")]
    NotFound(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the operation that produced this error should be retried
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout
            | ProviderError::Connection(_)
            | ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => *status >= 500,
            ProviderError::InvalidResponse(_) | ProviderError::Validation(_) => false,
        }
    }
}

impl RetryableError for SearchError {
    fn is_retryable(&self) -> bool {
        match self {
            SearchError::Request(_) => true,
            SearchError::Status { status, .. } => *status >= 500,
        }
    }
}
