//! # syncrepl storage
//!
//! Backends for the journal of a mirror store.
//!
//! A backend is an append-only byte store. It knows how to append, read
//! back, flush, sync and shrink, and how many bytes are durable. It knows
//! nothing about records, entries or cookies; `syncrepl_core` frames the
//! journal and recovers it after a crash.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - The `journal.log` of an on-disk mirror
//! - [`InMemoryBackend`] - For tests and throwaway mirrors
//!
//! ## Example
//!
//! ```rust
//! use syncrepl_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut journal = InMemoryBackend::new();
//! let offset = journal.append(b"batch").unwrap();
//! assert_eq!(journal.read_at(offset, 5).unwrap(), b"batch");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
