//! Error types for the sync engine.

use syncrepl_core::{DbError, UrlError, VersionError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Store error while reading or applying changes.
    #[error("database error: {0}")]
    Db(DbError),

    /// The stored mirror was written by an incompatible build.
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// The requested search cannot be served by the stored mirror, or the
    /// URL could not be parsed.
    #[error("search definition error: {0}")]
    Url(#[from] UrlError),

    /// The server refused to resume from the presented cookie.
    #[error("server rejected the sync cookie")]
    CookieRejected,

    /// The session was lost mid-stream.
    #[error("disconnected from server")]
    Disconnected,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server sent an event that is not valid at this point.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The operation is not valid in the engine's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Current state.
        state: String,
        /// What was attempted.
        operation: String,
    },

    /// The engine has been closed.
    #[error("engine is closed")]
    Closed,
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Version(e) => Self::Version(e),
            other => Self::Db(other),
        }
    }
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if reopening the session may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Disconnected => true,
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
