//! Sync engine state machine.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::event::SyncEvent;
use crate::transport::{SessionHandle, SessionRequest, SyncTransport};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syncrepl_core::{
    resolve, AllDns, Cookie, Entry, LdapUrl, Resolution, Store, Transaction, UrlDescriptor,
};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No session is open. The mirror can be read.
    Idle,
    /// A session is being opened.
    Requesting,
    /// Events are being applied.
    Streaming,
    /// Inside a present phase.
    PresentReconciling,
    /// The engine has been closed.
    Closed,
}

impl EngineState {
    /// Returns true while a session is delivering events.
    pub fn is_streaming(&self) -> bool {
        matches!(self, EngineState::Streaming | EngineState::PresentReconciling)
    }

    /// Returns true if a new session can be started.
    pub fn can_start_session(&self) -> bool {
        matches!(self, EngineState::Idle)
    }
}

/// Counters over the lifetime of an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Sessions opened.
    pub sessions: u64,
    /// Events received.
    pub events: u64,
    /// Entries added or overwritten.
    pub adds: u64,
    /// Entries modified.
    pub modifies: u64,
    /// Delete events applied.
    pub deletes: u64,
    /// Entries removed at the end of a present phase.
    pub pruned: u64,
    /// Cookies recorded.
    pub cookie_advances: u64,
    /// Fresh sessions requested after a rejected cookie.
    pub fallbacks: u64,
    /// Modifies skipped because the entry was unknown.
    pub skipped_modifies: u64,
    /// Store commits.
    pub commits: u64,
}

/// Result of a single [`SyncEngine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One event was applied or staged.
    Applied,
    /// The server ended the stream; the engine is idle again.
    EndOfStream,
}

/// How a [`SyncEngine::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stream ended.
    Completed,
    /// A [`CancelHandle`] stopped the run.
    Cancelled,
}

/// Stops a running engine between events.
///
/// Cancellation never interrupts a commit. Staged events are flushed before
/// the session is closed.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation has been requested and not yet honored.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Session {
    handle: Option<SessionHandle>,
    pending: Option<Transaction>,
    staged: usize,
    in_present_phase: bool,
    /// Cookie in force, stamped on every written entry.
    cookie: Option<Cookie>,
}

impl Session {
    fn txn(&mut self, store: &Store) -> SyncResult<&mut Transaction> {
        let txn = match self.pending.take() {
            Some(txn) => txn,
            None => store.begin()?,
        };
        Ok(self.pending.insert(txn))
    }
}

/// Keeps a [`Store`] in step with a server through a [`SyncTransport`].
///
/// One session at a time. `step` and `run` may be called from one thread
/// while another holds a [`CancelHandle`] or calls `close`.
pub struct SyncEngine<T: SyncTransport> {
    config: EngineConfig,
    transport: T,
    store: Store,
    descriptor: UrlDescriptor,
    /// Also serializes `step` against `close`.
    session: Mutex<Session>,
    state: RwLock<EngineState>,
    stats: RwLock<SyncStats>,
    cancelled: Arc<AtomicBool>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Opens the mirror at `path` for `descriptor`.
    ///
    /// # Errors
    ///
    /// `Version` if the stored mirror was written by an incompatible build,
    /// `Url` if it was built for a different search, and `Db` for anything
    /// else the store refuses.
    pub fn open(
        path: impl AsRef<Path>,
        descriptor: UrlDescriptor,
        transport: T,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        let store = Store::open_with_config(path.as_ref(), config.store.clone())?;
        Self::with_store(store, descriptor, transport, config)
    }

    /// Opens the mirror at `path` for the search in an LDAP URL.
    pub fn open_url(
        path: impl AsRef<Path>,
        url: &str,
        transport: T,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        let descriptor = LdapUrl::parse(url)?.into_descriptor();
        Self::open(path, descriptor, transport, config)
    }

    /// Wraps an already open store.
    ///
    /// A store with no recorded search adopts `descriptor`. A store built
    /// for a different search is refused with [`SyncError::Url`]; the
    /// caller decides whether to [`Store::reset`] it.
    pub fn with_store(
        store: Store,
        descriptor: UrlDescriptor,
        transport: T,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        match resolve(store.descriptor()?.as_ref(), &descriptor)? {
            Resolution::Adopt => {
                store.transaction(|txn| {
                    txn.clear_cookie()?;
                    txn.set_descriptor(descriptor.clone())
                })?;
                info!(store_id = %store.store_id(), search = %descriptor, "adopted search");
            }
            Resolution::Proceed => {
                info!(
                    store_id = %store.store_id(),
                    search = %descriptor,
                    entries = store.entry_count()?,
                    resumable = store.cookie()?.is_some(),
                    "resuming mirror"
                );
            }
        }

        Ok(Self {
            config,
            transport,
            store,
            descriptor,
            session: Mutex::new(Session::default()),
            state: RwLock::new(EngineState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Gets the current state. Still answers after `close`.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the current stats. Still answers after `close`.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a handle that can cancel a running session from any thread.
    ///
    /// # Errors
    ///
    /// `Closed` once the engine is closed.
    pub fn cancel_handle(&self) -> SyncResult<CancelHandle> {
        self.ensure_open()?;
        Ok(CancelHandle(Arc::clone(&self.cancelled)))
    }

    /// Requests cancellation of the running session.
    ///
    /// # Errors
    ///
    /// `Closed` once the engine is closed.
    pub fn cancel(&self) -> SyncResult<()> {
        self.ensure_open()?;
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.state() == EngineState::Closed {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    fn invalid_state(&self, operation: &str) -> SyncError {
        SyncError::InvalidState {
            state: format!("{:?}", self.state()),
            operation: operation.to_string(),
        }
    }

    /// Opens a session, resuming from the stored cookie when there is one.
    ///
    /// If the server rejects the cookie it is cleared, and with
    /// `fresh_session_fallback` a single fresh session is requested.
    pub fn start_session(&self) -> SyncResult<()> {
        self.ensure_open()?;
        let mut session = self.session.lock();
        self.ensure_open()?;

        if !self.state().can_start_session() {
            return Err(self.invalid_state("start a session"));
        }

        self.set_state(EngineState::Requesting);
        match self.open_session(&mut session) {
            Ok(()) => {
                self.set_state(EngineState::Streaming);
                Ok(())
            }
            Err(e) => {
                self.set_state(EngineState::Idle);
                Err(e)
            }
        }
    }

    fn open_session(&self, session: &mut Session) -> SyncResult<()> {
        let cookie = self.store.cookie()?;
        let request = SessionRequest {
            descriptor: self.descriptor.clone(),
            cookie: cookie.clone(),
            mode: self.config.mode,
        };

        let (handle, cookie) = match self.transport.open_session(&request) {
            Ok(handle) => (handle, cookie),
            Err(SyncError::CookieRejected) if request.cookie.is_some() => {
                warn!(
                    cookie = %request.cookie.as_ref().map(Cookie::to_hex).unwrap_or_default(),
                    "server rejected cookie; discarding it"
                );
                self.store.transaction(|txn| txn.clear_cookie())?;
                self.stats.write().commits += 1;

                if !self.config.fresh_session_fallback {
                    return Err(SyncError::CookieRejected);
                }

                self.stats.write().fallbacks += 1;
                info!("requesting a fresh session");
                let fresh = SessionRequest {
                    cookie: None,
                    ..request
                };
                (self.transport.open_session(&fresh)?, None)
            }
            Err(e) => return Err(e),
        };

        info!(
            session = handle.id(),
            resumed = handle.is_resumed(),
            mode = ?self.config.mode,
            "session opened"
        );
        *session = Session {
            handle: Some(handle),
            cookie,
            ..Session::default()
        };
        self.stats.write().sessions += 1;
        Ok(())
    }

    /// Processes one event from the open session.
    ///
    /// A pending cancellation flushes staged events, closes the session and
    /// returns [`SyncError::Cancelled`]. Any other failure also closes the
    /// session after flushing what was staged before the failing event.
    pub fn step(&self) -> SyncResult<StepOutcome> {
        self.ensure_open()?;
        let mut session = self.session.lock();
        self.ensure_open()?;

        if !self.state().is_streaming() {
            return Err(self.invalid_state("process an event"));
        }
        let Some(handle) = session.handle.clone() else {
            return Err(self.invalid_state("process an event"));
        };

        if self.cancelled.swap(false, Ordering::SeqCst) {
            info!(session = handle.id(), "session cancelled");
            self.end_session(&mut session)?;
            return Err(SyncError::Cancelled);
        }

        let event = match self.transport.next_event(&handle) {
            Ok(Some(event)) => event,
            Ok(None) => {
                if session.in_present_phase {
                    warn!(
                        session = handle.id(),
                        "stream ended inside a present phase; nothing pruned"
                    );
                }
                self.end_session(&mut session)?;
                info!(session = handle.id(), sequence = %self.store.sequence(), "session complete");
                return Ok(StepOutcome::EndOfStream);
            }
            Err(e) => return Err(self.fail_session(&mut session, e)),
        };

        match self.apply(&mut session, event) {
            Ok(()) => Ok(StepOutcome::Applied),
            Err(e) => Err(self.fail_session(&mut session, e)),
        }
    }

    /// Drives the session until the stream ends or the engine is cancelled.
    ///
    /// Starts a session first when the engine is idle. Disconnects are
    /// returned to the caller, who may run again to resume.
    pub fn run(&self) -> SyncResult<RunOutcome> {
        self.ensure_open()?;
        if self.state().can_start_session() {
            self.start_session()?;
        }

        loop {
            match self.step() {
                Ok(StepOutcome::Applied) => {}
                Ok(StepOutcome::EndOfStream) => return Ok(RunOutcome::Completed),
                Err(SyncError::Cancelled) => return Ok(RunOutcome::Cancelled),
                Err(e) => return Err(e),
            }
        }
    }

    fn apply(&self, session: &mut Session, event: SyncEvent) -> SyncResult<()> {
        debug!(kind = event.kind(), dn = event.dn().unwrap_or_default(), "applying event");
        self.stats.write().events += 1;

        match event {
            SyncEvent::EntryAdded(mut entry) => {
                if entry.dn.is_empty() {
                    return Err(SyncError::protocol("entry without a DN"));
                }
                entry.present = true;
                entry.last_cookie_seen = session.cookie.clone();
                session.txn(&self.store)?.put(entry)?;
                self.stats.write().adds += 1;
            }
            SyncEvent::EntryModified { dn, deltas } => {
                let current = {
                    let txn = session.txn(&self.store)?;
                    self.store.get_in_txn(txn, &dn)?
                };
                let Some(mut entry) = current else {
                    warn!(dn = %dn, "modify for unknown entry skipped");
                    self.stats.write().skipped_modifies += 1;
                    return Ok(());
                };
                for delta in &deltas {
                    entry.apply_delta(delta);
                }
                entry.present = true;
                entry.last_cookie_seen = session.cookie.clone();
                session.txn(&self.store)?.put(entry)?;
                self.stats.write().modifies += 1;
            }
            SyncEvent::EntryDeleted(dn) => {
                session.txn(&self.store)?.delete(dn)?;
                self.stats.write().deletes += 1;
            }
            SyncEvent::CookieAdvance(cookie) => {
                session.txn(&self.store)?.set_cookie(cookie.clone())?;
                session.cookie = Some(cookie);
                self.stats.write().cookie_advances += 1;
                return self.flush(session);
            }
            SyncEvent::PresentPhaseBegin => {
                if session.in_present_phase {
                    return Err(SyncError::protocol("present phase began twice"));
                }
                self.flush(session)?;
                session.txn(&self.store)?.reset_presence()?;
                session.in_present_phase = true;
                self.set_state(EngineState::PresentReconciling);
                info!(entries = self.store.entry_count()?, "present phase started");
            }
            SyncEvent::PresentPhaseEntry(dn) => {
                if !session.in_present_phase {
                    return Err(SyncError::protocol(format!(
                        "present entry {dn} outside a present phase"
                    )));
                }
                session.txn(&self.store)?.mark_present(dn)?;
            }
            SyncEvent::PresentPhaseEnd => {
                if !session.in_present_phase {
                    return Err(SyncError::protocol("present phase ended without beginning"));
                }
                let absent = {
                    let txn = session.txn(&self.store)?;
                    self.store.absent_dns_in(txn)?
                };
                let txn = session.txn(&self.store)?;
                for dn in &absent {
                    txn.delete(dn.as_str())?;
                }
                self.flush(session)?;

                session.in_present_phase = false;
                self.stats.write().pruned += absent.len() as u64;
                self.set_state(EngineState::Streaming);
                info!(pruned = absent.len(), "present phase complete");
                return Ok(());
            }
        }

        session.staged += 1;
        if session.staged >= self.config.max_batch_events {
            self.flush(session)?;
        }
        Ok(())
    }

    /// Commits staged events. The pending transaction is dropped even when
    /// the commit fails.
    fn flush(&self, session: &mut Session) -> SyncResult<()> {
        session.staged = 0;
        let Some(mut txn) = session.pending.take() else {
            return Ok(());
        };
        if txn.is_empty() {
            return Ok(());
        }

        let sequence = self.store.commit(&mut txn)?;
        self.stats.write().commits += 1;
        debug!(%sequence, ops = txn.len(), "flushed staged events");
        Ok(())
    }

    /// Flushes, closes the transport session and returns to `Idle`.
    fn end_session(&self, session: &mut Session) -> SyncResult<()> {
        let flushed = self.flush(session);
        if let Some(handle) = session.handle.take() {
            let id = handle.id();
            if let Err(e) = self.transport.close_session(handle) {
                warn!(session = id, error = %e, "closing session failed");
            }
        }
        session.in_present_phase = false;
        if self.state() != EngineState::Closed {
            self.set_state(EngineState::Idle);
        }
        flushed
    }

    fn fail_session(&self, session: &mut Session, err: SyncError) -> SyncError {
        warn!(error = %err, "session ended");
        if let Err(e) = self.end_session(session) {
            warn!(error = %e, "could not flush staged events");
        }
        err
    }

    /// Gets a mirrored entry by DN.
    pub fn get(&self, dn: &str) -> SyncResult<Option<Entry>> {
        self.ensure_open()?;
        Ok(self.store.get(dn)?)
    }

    /// Returns every mirrored DN.
    pub fn all_dns(&self) -> SyncResult<AllDns> {
        self.ensure_open()?;
        Ok(self.store.all_dns()?)
    }

    /// Returns the stored cookie.
    pub fn cookie(&self) -> SyncResult<Option<Cookie>> {
        self.ensure_open()?;
        Ok(self.store.cookie()?)
    }

    /// Returns the search recorded in the mirror.
    pub fn descriptor(&self) -> SyncResult<Option<UrlDescriptor>> {
        self.ensure_open()?;
        Ok(self.store.descriptor()?)
    }

    /// Returns the underlying store.
    pub fn store(&self) -> SyncResult<&Store> {
        self.ensure_open()?;
        Ok(&self.store)
    }

    /// Stops the engine and releases the store.
    ///
    /// Waits for a running step to finish, flushes staged events and closes
    /// the session. Every later call fails with [`SyncError::Closed`].
    pub fn close(&self) -> SyncResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut session = self.session.lock();
        self.ensure_open()?;

        let flushed = self.end_session(&mut session);
        self.set_state(EngineState::Closed);
        let closed = self.store.close();

        info!(store_id = %self.store.store_id(), "engine closed");
        flushed?;
        closed?;
        Ok(())
    }
}

impl<T: SyncTransport> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        if self.state() != EngineState::Closed {
            let _ = self.close();
        }
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("descriptor", &self.descriptor)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use bytes::Bytes;
    use syncrepl_core::{AttributeDelta, Scope};

    fn descriptor() -> UrlDescriptor {
        UrlDescriptor::new("dc=example,dc=com", Scope::Subtree, "", ["cn", "mail"])
    }

    fn entry(name: &str) -> Entry {
        Entry::new(format!("cn={name},dc=example,dc=com")).with_text("cn", &[name])
    }

    fn dn(name: &str) -> String {
        format!("cn={name},dc=example,dc=com")
    }

    fn engine(
        transport: Arc<MockTransport>,
        config: EngineConfig,
    ) -> SyncEngine<Arc<MockTransport>> {
        let store = Store::open_in_memory().unwrap();
        SyncEngine::with_store(store, descriptor(), transport, config).unwrap()
    }

    #[test]
    fn engine_state_checks() {
        assert!(EngineState::Idle.can_start_session());
        assert!(!EngineState::Streaming.can_start_session());
        assert!(!EngineState::Closed.can_start_session());

        assert!(EngineState::Streaming.is_streaming());
        assert!(EngineState::PresentReconciling.is_streaming());
        assert!(!EngineState::Requesting.is_streaming());
    }

    #[test]
    fn new_store_adopts_descriptor() {
        let engine = engine(Arc::new(MockTransport::new()), EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.descriptor().unwrap(), Some(descriptor()));
        assert_eq!(engine.cookie().unwrap(), None);
    }

    #[test]
    fn conflicting_store_is_refused() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                txn.set_descriptor(UrlDescriptor::new("dc=example,dc=com", Scope::One, "", ["cn"]))
            })
            .unwrap();

        let result = SyncEngine::with_store(
            store,
            descriptor(),
            MockTransport::new(),
            EngineConfig::default(),
        );
        assert!(matches!(result, Err(SyncError::Url(_))));
    }

    #[test]
    fn run_applies_events_and_cookie() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::EntryAdded(entry("b")),
            SyncEvent::EntryModified {
                dn: dn("a"),
                deltas: vec![AttributeDelta::Add {
                    attribute: "mail".into(),
                    values: vec![Bytes::from_static(b"a@example.com")],
                }],
            },
            SyncEvent::EntryDeleted(dn("b")),
            SyncEvent::CookieAdvance(Cookie::from("c1")),
        ]);

        let engine = engine(Arc::clone(&transport), EngineConfig::default());
        assert_eq!(engine.run().unwrap(), RunOutcome::Completed);
        assert_eq!(engine.state(), EngineState::Idle);

        let a = engine.get(&dn("a")).unwrap().unwrap();
        assert_eq!(a.text_values("mail"), vec!["a@example.com"]);
        assert!(engine.get(&dn("b")).unwrap().is_none());
        assert_eq!(engine.cookie().unwrap(), Some(Cookie::from("c1")));

        let stats = engine.stats();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.events, 5);
        assert_eq!(stats.adds, 2);
        assert_eq!(stats.modifies, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.cookie_advances, 1);
        assert_eq!(transport.closed_sessions(), vec![1]);
    }

    #[test]
    fn second_run_resumes_from_cookie() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![SyncEvent::CookieAdvance(Cookie::from("c1"))]);
        transport.push_session(Vec::new());

        let engine = engine(Arc::clone(&transport), EngineConfig::default());
        engine.run().unwrap();
        engine.run().unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].cookie, None);
        assert_eq!(requests[1].cookie, Some(Cookie::from("c1")));
        assert_eq!(requests[1].descriptor, descriptor());
    }

    #[test]
    fn entries_carry_cookie_in_force() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::CookieAdvance(Cookie::from("c1")),
            SyncEvent::EntryAdded(entry("b")),
        ]);

        let engine = engine(transport, EngineConfig::default());
        engine.run().unwrap();

        assert_eq!(engine.get(&dn("a")).unwrap().unwrap().last_cookie_seen, None);
        assert_eq!(
            engine.get(&dn("b")).unwrap().unwrap().last_cookie_seen,
            Some(Cookie::from("c1"))
        );
    }

    #[test]
    fn modify_of_unknown_entry_is_skipped() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![SyncEvent::EntryModified {
            dn: dn("ghost"),
            deltas: Vec::new(),
        }]);

        let engine = engine(transport, EngineConfig::default());
        engine.run().unwrap();

        assert!(engine.get(&dn("ghost")).unwrap().is_none());
        assert_eq!(engine.stats().skipped_modifies, 1);
    }

    #[test]
    fn present_phase_prunes_unlisted_entries() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::EntryAdded(entry("b")),
            SyncEvent::EntryAdded(entry("c")),
            SyncEvent::PresentPhaseBegin,
            SyncEvent::PresentPhaseEntry(dn("a")),
            SyncEvent::PresentPhaseEntry(dn("b")),
            SyncEvent::PresentPhaseEnd,
        ]);

        let engine = engine(transport, EngineConfig::default());
        engine.run().unwrap();

        let dns: Vec<String> = engine.all_dns().unwrap().collect();
        assert_eq!(dns, vec![dn("a"), dn("b")]);
        assert_eq!(engine.stats().pruned, 1);
        assert!(engine.get(&dn("a")).unwrap().unwrap().present);
    }

    #[test]
    fn add_inside_present_phase_counts_as_present() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::PresentPhaseBegin,
            SyncEvent::EntryAdded(entry("b")),
            SyncEvent::PresentPhaseEnd,
        ]);

        let engine = engine(transport, EngineConfig::default());
        engine.run().unwrap();

        let dns: Vec<String> = engine.all_dns().unwrap().collect();
        assert_eq!(dns, vec![dn("b")]);
    }

    #[test]
    fn present_events_out_of_phase_are_protocol_errors() {
        for event in [
            SyncEvent::PresentPhaseEntry(dn("a")),
            SyncEvent::PresentPhaseEnd,
        ] {
            let transport = Arc::new(MockTransport::new());
            transport.push_session(vec![SyncEvent::EntryAdded(entry("a")), event]);

            let engine = engine(Arc::clone(&transport), EngineConfig::default());
            assert!(matches!(engine.run(), Err(SyncError::Protocol(_))));
            assert_eq!(engine.state(), EngineState::Idle);
            assert!(engine.get(&dn("a")).unwrap().is_some());
            assert_eq!(transport.closed_sessions().len(), 1);
        }

        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![SyncEvent::PresentPhaseBegin, SyncEvent::PresentPhaseBegin]);
        let engine = engine(transport, EngineConfig::default());
        assert!(matches!(engine.run(), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn batching_defers_commits_until_cookie() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::EntryAdded(entry("b")),
            SyncEvent::EntryAdded(entry("c")),
            SyncEvent::CookieAdvance(Cookie::from("c1")),
        ]);

        let engine = engine(transport, EngineConfig::new().with_max_batch_events(100));
        engine.start_session().unwrap();
        engine.step().unwrap();
        engine.step().unwrap();
        assert!(engine.get(&dn("a")).unwrap().is_none());

        engine.step().unwrap();
        engine.step().unwrap();
        assert!(engine.get(&dn("a")).unwrap().is_some());
        assert_eq!(engine.cookie().unwrap(), Some(Cookie::from("c1")));
        assert_eq!(engine.store().unwrap().sequence().as_u64(), 2);
        assert_eq!(engine.step().unwrap(), StepOutcome::EndOfStream);
    }

    #[test]
    fn rejected_cookie_falls_back_once() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![SyncEvent::CookieAdvance(Cookie::from("c1"))]);
        transport.push_session(vec![SyncEvent::CookieAdvance(Cookie::from("c2"))]);

        let engine = engine(Arc::clone(&transport), EngineConfig::default());
        engine.run().unwrap();

        transport.reject_cookies(true);
        engine.run().unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].cookie, Some(Cookie::from("c1")));
        assert_eq!(requests[2].cookie, None);
        assert_eq!(engine.cookie().unwrap(), Some(Cookie::from("c2")));
        assert_eq!(engine.stats().fallbacks, 1);
    }

    #[test]
    fn rejected_cookie_without_fallback_is_reported() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![SyncEvent::CookieAdvance(Cookie::from("c1"))]);
        transport.push_session(Vec::new());

        let engine = engine(
            Arc::clone(&transport),
            EngineConfig::new().with_fresh_session_fallback(false),
        );
        engine.run().unwrap();

        transport.reject_cookies(true);
        assert!(matches!(engine.run(), Err(SyncError::CookieRejected)));
        assert_eq!(engine.cookie().unwrap(), None);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(transport.remaining_sessions(), 1);
    }

    #[test]
    fn disconnect_keeps_applied_events() {
        let transport = Arc::new(MockTransport::new());
        transport.push_disconnecting_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::CookieAdvance(Cookie::from("c1")),
            SyncEvent::EntryAdded(entry("b")),
        ]);

        let engine = engine(transport, EngineConfig::new().with_max_batch_events(10));
        let err = engine.run().unwrap_err();
        assert!(matches!(err, SyncError::Disconnected));
        assert!(err.is_retryable());

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.get(&dn("b")).unwrap().is_some());
        assert_eq!(engine.cookie().unwrap(), Some(Cookie::from("c1")));
    }

    #[test]
    fn cancel_stops_between_events() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![
            SyncEvent::EntryAdded(entry("a")),
            SyncEvent::EntryAdded(entry("b")),
        ]);

        let engine = engine(Arc::clone(&transport), EngineConfig::new().with_max_batch_events(10));
        engine.start_session().unwrap();
        engine.step().unwrap();

        let handle = engine.cancel_handle().unwrap();
        handle.cancel();
        assert_eq!(engine.run().unwrap(), RunOutcome::Cancelled);
        assert!(!handle.is_cancelled());

        assert!(engine.get(&dn("a")).unwrap().is_some());
        assert!(engine.get(&dn("b")).unwrap().is_none());
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(transport.closed_sessions(), vec![1]);
    }

    #[test]
    fn step_requires_open_session() {
        let engine = engine(Arc::new(MockTransport::new()), EngineConfig::default());
        assert!(matches!(engine.step(), Err(SyncError::InvalidState { .. })));
    }

    #[test]
    fn start_session_twice_is_invalid() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(Vec::new());
        let engine = engine(transport, EngineConfig::default());

        engine.start_session().unwrap();
        assert!(matches!(
            engine.start_session(),
            Err(SyncError::InvalidState { .. })
        ));
    }

    #[test]
    fn close_flushes_and_refuses_everything() {
        let transport = Arc::new(MockTransport::new());
        transport.push_session(vec![SyncEvent::EntryAdded(entry("a"))]);

        let engine = engine(transport, EngineConfig::new().with_max_batch_events(10));
        engine.start_session().unwrap();
        engine.step().unwrap();
        engine.close().unwrap();

        assert_eq!(engine.state(), EngineState::Closed);
        assert!(matches!(engine.get(&dn("a")), Err(SyncError::Closed)));
        assert!(matches!(engine.all_dns(), Err(SyncError::Closed)));
        assert!(matches!(engine.cookie(), Err(SyncError::Closed)));
        assert!(matches!(engine.descriptor(), Err(SyncError::Closed)));
        assert!(matches!(engine.store(), Err(SyncError::Closed)));
        assert!(matches!(engine.start_session(), Err(SyncError::Closed)));
        assert!(matches!(engine.step(), Err(SyncError::Closed)));
        assert!(matches!(engine.run(), Err(SyncError::Closed)));
        assert!(matches!(engine.cancel(), Err(SyncError::Closed)));
        assert!(matches!(engine.cancel_handle(), Err(SyncError::Closed)));
        assert!(matches!(engine.close(), Err(SyncError::Closed)));
    }
}
