//! Events delivered by a sync session.

use syncrepl_core::{AttributeDelta, Cookie, Entry};

/// One change or control message from the server, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A full entry. Overwrites any stored entry with the same DN.
    EntryAdded(Entry),
    /// Attribute changes to an existing entry.
    EntryModified {
        /// Entry DN.
        dn: String,
        /// Changes, applied in order.
        deltas: Vec<AttributeDelta>,
    },
    /// The entry left the search result.
    EntryDeleted(String),
    /// Everything before this event is covered by `cookie`.
    CookieAdvance(Cookie),
    /// The server is about to list every entry that still matches.
    PresentPhaseBegin,
    /// The entry with this DN still matches.
    PresentPhaseEntry(String),
    /// The listing is complete; unlisted entries are gone.
    PresentPhaseEnd,
}

impl SyncEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntryAdded(_) => "add",
            Self::EntryModified { .. } => "modify",
            Self::EntryDeleted(_) => "delete",
            Self::CookieAdvance(_) => "cookie",
            Self::PresentPhaseBegin => "present-begin",
            Self::PresentPhaseEntry(_) => "present",
            Self::PresentPhaseEnd => "present-end",
        }
    }

    /// Returns the DN the event refers to, if any.
    pub fn dn(&self) -> Option<&str> {
        match self {
            Self::EntryAdded(entry) => Some(&entry.dn),
            Self::EntryModified { dn, .. }
            | Self::EntryDeleted(dn)
            | Self::PresentPhaseEntry(dn) => Some(dn),
            Self::CookieAdvance(_) | Self::PresentPhaseBegin | Self::PresentPhaseEnd => None,
        }
    }
}
