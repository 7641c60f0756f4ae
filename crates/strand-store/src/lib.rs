//! SQLite backing store for strand sessions.
//!
//! [`SqliteStore`] implements [`strand_session::BackingStore`] over a single
//! database file that every node in the cluster opens.

pub mod error;
mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::{SqliteStore, StoreStats};
