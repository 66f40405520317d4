//! Store configuration.

use crate::types::DnPolicy;
use crate::version::VersionGuard;

/// Configuration for opening a mirror store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Journal size in bytes that triggers an automatic checkpoint (0 = never).
    pub checkpoint_threshold: u64,

    /// DN policy. `None` accepts whatever an existing store recorded and
    /// uses the default for a new one.
    pub dn_policy: Option<DnPolicy>,

    /// Running versions and registered migrations.
    pub guard: VersionGuard,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            checkpoint_threshold: 16 * 1024 * 1024, // 16 MB
            dn_policy: None,
            guard: VersionGuard::new(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }

    /// Requires a DN policy.
    #[must_use]
    pub const fn dn_policy(mut self, policy: DnPolicy) -> Self {
        self.dn_policy = Some(policy);
        self
    }

    /// Sets the version guard.
    #[must_use]
    pub fn guard(mut self, guard: VersionGuard) -> Self {
        self.guard = guard;
        self
    }
}
