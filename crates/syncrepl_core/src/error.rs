//! Error types for the mirror store.

use crate::version::VersionError;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by the persistent store.
///
/// `Schema`, `SchemaVersion` and `Setting` describe structural problems in
/// the persisted container. They are fatal to the open or commit that hit
/// them and are never patched silently.
#[derive(Debug, Error)]
pub enum DbError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] syncrepl_storage::StorageError),

    /// I/O error outside the journal backend (manifest, snapshot, lock).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The persisted container is malformed: bad magic, checksum failure,
    /// missing required field, or a broken invariant.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// A container section uses a layout version newer than this build reads.
    #[error("{section} layout version {found} is newer than supported version {supported}")]
    SchemaVersion {
        /// Which file section was rejected.
        section: &'static str,
        /// Layout version found on disk.
        found: u16,
        /// Highest layout version this build reads.
        supported: u16,
    },

    /// A setting recorded at creation conflicts with the requested settings.
    #[error("setting {name} is {stored} in the store, but {requested} was requested")]
    Setting {
        /// Setting name.
        name: String,
        /// Value recorded in the store.
        stored: String,
        /// Value the caller asked for.
        requested: String,
    },

    /// The stored format or runtime version is not usable by this build.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was refused.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// A journal write failed and could not be rolled back; reopen the store.
    #[error("store is poisoned by a failed journal write; reopen to recover")]
    Poisoned,
}

impl DbError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for the structural family (`Schema`, `SchemaVersion`, `Setting`).
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. } | Self::SchemaVersion { .. } | Self::Setting { .. }
        )
    }
}
