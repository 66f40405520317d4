//! # syncrepl engine
//!
//! Keeps a local mirror of an LDAP search current by consuming a syncrepl
//! event stream.
//!
//! This crate provides:
//! - The session state machine (idle → requesting → streaming → present
//!   reconciliation → idle)
//! - Cookie resumption with a single fresh-session fallback
//! - Present-phase pruning of entries the server no longer reports
//! - A transport abstraction and a scripted [`MockTransport`]
//!
//! ## Key Invariants
//!
//! - Events are applied strictly in order
//! - Applying an event twice leaves the mirror unchanged
//! - The stored cookie never points past unapplied data
//! - After [`SyncEngine::close`] every operation fails with [`SyncError::Closed`]
//!
//! ## Example
//!
//! ```rust
//! use syncrepl_core::{Entry, Scope, Store, UrlDescriptor};
//! use syncrepl_engine::{EngineConfig, MockTransport, SyncEngine, SyncEvent};
//!
//! let transport = MockTransport::new();
//! transport.push_session(vec![
//!     SyncEvent::EntryAdded(Entry::new("cn=a,dc=example,dc=com")),
//!     SyncEvent::CookieAdvance("rid=001,csn=1".into()),
//! ]);
//!
//! let descriptor = UrlDescriptor::new("dc=example,dc=com", Scope::Subtree, "", ["cn"]);
//! let store = Store::open_in_memory()?;
//! let engine = SyncEngine::with_store(store, descriptor, transport, EngineConfig::default())?;
//! engine.run()?;
//!
//! assert!(engine.get("cn=a,dc=example,dc=com")?.is_some());
//! engine.close()?;
//! # Ok::<(), syncrepl_engine::SyncError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod state;
mod transport;

pub use config::{EngineConfig, SyncMode};
pub use error::{SyncError, SyncResult};
pub use event::SyncEvent;
pub use state::{CancelHandle, EngineState, RunOutcome, StepOutcome, SyncEngine, SyncStats};
pub use transport::{MockTransport, SessionHandle, SessionRequest, SyncTransport};
