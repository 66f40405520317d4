//! # syncrepl testkit
//!
//! Test utilities for the syncrepl mirror.
//!
//! This crate provides:
//! - Mirror fixtures and sample data
//! - A storage backend that fails at a chosen byte, for crash testing
//! - Property-based generators for entries, deltas and sync events
//!
//! ## Usage
//!
//! ```rust
//! use syncrepl_testkit::prelude::*;
//!
//! with_temp_mirror(|store| {
//!     store.transaction(|txn| txn.put(sample_entry("alice")))?;
//!     assert!(store.get(&sample_dn("alice"))?.is_some());
//!     Ok::<(), syncrepl_core::DbError>(())
//! })
//! .unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
