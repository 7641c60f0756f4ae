//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur in the SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Attribute (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database file or its directory could not be prepared.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be turned back into a record.
    #[error("Corrupt row {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// An insert hit an existing primary key.
    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

impl StoreError {
    /// Classify a failure to decode one column of the row stored under `key`.
    ///
    /// Type and range mismatches mean the row itself is bad; anything else is
    /// left as a database error.
    pub fn from_column(key: &str, err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            },
            err => StoreError::Database(err),
        }
    }

    /// Whether this is a primary key or unique constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<StoreError> for strand_session::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(key) => strand_session::Error::Conflict(key),
            StoreError::Corrupt { key, reason } => {
                strand_session::Error::CorruptRecord { key, reason }
            }
            err if err.is_constraint_violation() => {
                strand_session::Error::Conflict(err.to_string())
            }
            err => strand_session::Error::StoreUnavailable(err.to_string()),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
