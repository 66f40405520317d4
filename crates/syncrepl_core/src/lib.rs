//! # syncrepl core
//!
//! The local half of a syncrepl mirror: the persistent store, the version
//! guard that protects it, and the search-definition checks that decide
//! whether a stored mirror can serve a requested search.
//!
//! ## Components
//!
//! - [`Store`] - entries, cookie and descriptor behind journaled transactions
//! - [`VersionGuard`] / [`check`] - refuse stores written by incompatible builds
//! - [`resolve`] - compare a requested [`UrlDescriptor`] with the stored one
//! - [`LdapUrl`] - parse LDAP URLs into descriptors
//!
//! ## Example
//!
//! ```rust
//! use syncrepl_core::{resolve, Entry, Resolution, Scope, Store, UrlDescriptor};
//!
//! let store = Store::open_in_memory()?;
//! let wanted = UrlDescriptor::new("dc=example,dc=com", Scope::Subtree, "", ["cn"]);
//!
//! assert_eq!(resolve(store.descriptor()?.as_ref(), &wanted)?, Resolution::Adopt);
//! store.transaction(|txn| {
//!     txn.set_descriptor(wanted.clone())?;
//!     txn.put(Entry::new("cn=a,dc=example,dc=com").with_text("cn", &["a"]))
//! })?;
//! assert_eq!(resolve(store.descriptor()?.as_ref(), &wanted)?, Resolution::Proceed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod error;
mod manifest;
mod resolver;
mod store;
mod types;
mod url;
mod version;

pub use config::StoreConfig;
pub use error::{DbError, DbResult};
pub use manifest::{Manifest, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use resolver::{resolve, Resolution};
pub use store::{
    AllDns, Batch, ConsistencyWarning, Journal, JournalRecord, JournalScan, OpenReport,
    PendingOp, Store, StoreDir, Transaction, TransactionState, JOURNAL_MAGIC,
    JOURNAL_VERSION, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use types::{AttributeDelta, Cookie, DnPolicy, Entry, SequenceNumber};
pub use url::{DescriptorField, LdapUrl, Scope, UrlDescriptor, UrlError, DEFAULT_FILTER};
pub use version::{
    check, Compatibility, Component, MigrationRegistry, RuntimeMigration, Version,
    VersionError, VersionGuard, VersionInfo, ENGINE_FORMAT_VERSION, HOST_RUNTIME_VERSION,
};
