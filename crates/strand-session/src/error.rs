//! Error types for session coherence operations.
//!
//! Two consistency gaps are deliberately absent from this enum because the
//! layer never detects them:
//!
//! - a write-back that overwrites a record another node already took over
//!   (last writer wins at the store), and
//! - attribute mutations lost when a node dies between the mutation and the
//!   end of the request.

/// Error type for session coherence operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store could not be reached or failed mid-operation.
    #[error("Backing store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// An insert found an existing row for the same key.
    #[error("Record already exists: {0}")]
    Conflict(String),

    /// A session or cluster id was blank or malformed.
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),
}

/// Result type for session coherence operations.
pub type Result<T> = std::result::Result<T, Error>;
