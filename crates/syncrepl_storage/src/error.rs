//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by journal backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error with no file attached.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An I/O error on a named journal file.
    #[error("{path}: {source}")]
    File {
        /// File the operation touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The requested range is not fully inside the stored bytes.
    #[error("range {offset}+{len} outside {size} stored bytes")]
    OutOfRange {
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        len: usize,
        /// Bytes stored.
        size: u64,
    },

    /// Truncation can only shrink.
    #[error("cannot grow storage from {size} to {requested} bytes by truncation")]
    TruncateGrows {
        /// Requested length.
        requested: u64,
        /// Bytes stored.
        size: u64,
    },
}

impl StorageError {
    /// Wraps an I/O error with the file it happened on.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Returns the underlying I/O error kind, if any.
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(e) | Self::File { source: e, .. } => Some(e.kind()),
            _ => None,
        }
    }
}

pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::OutOfRange { offset, len, size }),
    }
}
