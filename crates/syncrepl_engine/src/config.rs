//! Configuration for the sync engine.

use syncrepl_core::StoreConfig;

/// How long a session lasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// The server sends the changes since the cookie, then ends the stream.
    #[default]
    RefreshOnly,
    /// After the refresh the server keeps the stream open and pushes changes.
    RefreshAndPersist,
}

/// Configuration for sync sessions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Settings for the mirror store.
    pub store: StoreConfig,
    /// Session mode requested from the server.
    pub mode: SyncMode,
    /// Staged events that trigger a commit. `1` commits every event.
    pub max_batch_events: usize,
    /// Retry once without a cookie when the server rejects it.
    pub fresh_session_fallback: bool,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            store: StoreConfig::default(),
            mode: SyncMode::RefreshOnly,
            max_batch_events: 1,
            fresh_session_fallback: true,
        }
    }

    /// Sets the store configuration.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the session mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets how many events are staged before a commit. Zero is treated as one.
    pub fn with_max_batch_events(mut self, events: usize) -> Self {
        self.max_batch_events = events.max(1);
        self
    }

    /// Enables or disables the fresh-session fallback.
    pub fn with_fresh_session_fallback(mut self, enabled: bool) -> Self {
        self.fresh_session_fallback = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.mode, SyncMode::RefreshOnly);
        assert_eq!(config.max_batch_events, 1);
        assert!(config.fresh_session_fallback);
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_mode(SyncMode::RefreshAndPersist)
            .with_max_batch_events(0)
            .with_fresh_session_fallback(false)
            .with_store(StoreConfig::new().sync_on_commit(false));
        assert_eq!(config.mode, SyncMode::RefreshAndPersist);
        assert_eq!(config.max_batch_events, 1);
        assert!(!config.fresh_session_fallback);
        assert!(!config.store.sync_on_commit);
    }
}
