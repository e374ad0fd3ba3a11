//! Error types for seva-core

use thiserror::Error;

/// Result type alias using seva-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in seva-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Check-in refused because the device is outside the check-in radius
    #[error("Check-in denied: device is {0:.1}m from the temple, outside the check-in radius")]
    LocationDenied(f64),

    /// Check-in attempted while a record for the day is already open
    #[error("Already checked in for {0} on {1}")]
    AlreadyCheckedIn(String, String),

    /// Check-out or accrual attempted without an open check-in
    #[error("Not checked in: {0} on {1}")]
    NotCheckedIn(String, String),

    /// State machine transition rejected
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Transient transport failure talking to the remote store
    #[error("Transport error: {0}")]
    Transport(String),

    /// Optimistic concurrency check failed; caller must refetch and retry
    #[error("Version conflict on {collection}/{id}: expected version {expected}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: i64,
    },

    /// Sync requested but no remote store is configured
    #[error("Remote store is not configured; engine is running in local-only mode")]
    RemoteUnavailable,
}

impl Error {
    /// Whether a sync run may retry the failed operation with backoff.
    ///
    /// Only transport failures are transient; everything else is surfaced
    /// to the caller unchanged.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
