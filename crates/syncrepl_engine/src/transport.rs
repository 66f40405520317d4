//! Transport layer abstraction for sync sessions.

use crate::config::SyncMode;
use crate::error::{SyncError, SyncResult};
use crate::event::SyncEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use syncrepl_core::{Cookie, UrlDescriptor};

/// What the engine asks the server for when it opens a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// The search to run.
    pub descriptor: UrlDescriptor,
    /// Resume point; `None` asks for a full refresh.
    pub cookie: Option<Cookie>,
    /// Session mode.
    pub mode: SyncMode,
}

/// An open session, as returned by [`SyncTransport::open_session`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u64,
    resumed: bool,
}

impl SessionHandle {
    /// Creates a handle. `resumed` records whether a cookie was accepted.
    pub fn new(id: u64, resumed: bool) -> Self {
        Self { id, resumed }
    }

    /// Transport-assigned session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true if the session resumed from a cookie.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }
}

/// A sync transport talks to the directory server.
///
/// Implementations report a refused cookie as [`SyncError::CookieRejected`]
/// and a lost connection as [`SyncError::Disconnected`].
pub trait SyncTransport: Send + Sync {
    /// Starts a sync session.
    fn open_session(&self, request: &SessionRequest) -> SyncResult<SessionHandle>;

    /// Waits for the next event. `None` is the end of the stream.
    fn next_event(&self, session: &SessionHandle) -> SyncResult<Option<SyncEvent>>;

    /// Ends a session.
    fn close_session(&self, session: SessionHandle) -> SyncResult<()>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn open_session(&self, request: &SessionRequest) -> SyncResult<SessionHandle> {
        (**self).open_session(request)
    }

    fn next_event(&self, session: &SessionHandle) -> SyncResult<Option<SyncEvent>> {
        (**self).next_event(session)
    }

    fn close_session(&self, session: SessionHandle) -> SyncResult<()> {
        (**self).close_session(session)
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Event(SyncEvent),
    Disconnect,
}

/// A transport that replays scripted sessions, for tests.
///
/// Each call to `open_session` consumes the next scripted session. Share it
/// through an `Arc` to inspect the recorded requests after handing it to an
/// engine.
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<VecDeque<Scripted>>>,
    open: Mutex<HashMap<u64, VecDeque<Scripted>>>,
    requests: Mutex<Vec<SessionRequest>>,
    closed: Mutex<Vec<u64>>,
    reject_cookies: AtomicBool,
    next_id: AtomicU64,
}

impl MockTransport {
    /// Creates a transport with no scripted sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a session that delivers `events` and then ends.
    pub fn push_session(&self, events: Vec<SyncEvent>) {
        self.scripts
            .lock()
            .push_back(events.into_iter().map(Scripted::Event).collect());
    }

    /// Scripts a session that delivers `events` and then drops the connection.
    pub fn push_disconnecting_session(&self, events: Vec<SyncEvent>) {
        let mut script: VecDeque<Scripted> = events.into_iter().map(Scripted::Event).collect();
        script.push_back(Scripted::Disconnect);
        self.scripts.lock().push_back(script);
    }

    /// Makes every request that carries a cookie fail with `CookieRejected`.
    pub fn reject_cookies(&self, reject: bool) {
        self.reject_cookies.store(reject, Ordering::SeqCst);
    }

    /// Returns every session request received, in order.
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().clone()
    }

    /// Returns the ids of the sessions that were closed.
    pub fn closed_sessions(&self) -> Vec<u64> {
        self.closed.lock().clone()
    }

    /// Returns the number of scripted sessions not yet opened.
    pub fn remaining_sessions(&self) -> usize {
        self.scripts.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn open_session(&self, request: &SessionRequest) -> SyncResult<SessionHandle> {
        self.requests.lock().push(request.clone());

        if request.cookie.is_some() && self.reject_cookies.load(Ordering::SeqCst) {
            return Err(SyncError::CookieRejected);
        }

        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::transport_retryable("no scripted session"))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.open.lock().insert(id, script);
        Ok(SessionHandle::new(id, request.cookie.is_some()))
    }

    fn next_event(&self, session: &SessionHandle) -> SyncResult<Option<SyncEvent>> {
        let mut open = self.open.lock();
        let script = open.get_mut(&session.id()).ok_or_else(|| {
            SyncError::transport_fatal(format!("unknown session {}", session.id()))
        })?;

        match script.pop_front() {
            Some(Scripted::Event(event)) => Ok(Some(event)),
            Some(Scripted::Disconnect) => {
                open.remove(&session.id());
                Err(SyncError::Disconnected)
            }
            None => Ok(None),
        }
    }

    fn close_session(&self, session: SessionHandle) -> SyncResult<()> {
        self.open.lock().remove(&session.id());
        self.closed.lock().push(session.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncrepl_core::{Entry, Scope};

    fn request(cookie: Option<&str>) -> SessionRequest {
        SessionRequest {
            descriptor: UrlDescriptor::new("dc=x", Scope::Subtree, "", ["cn"]),
            cookie: cookie.map(Cookie::from),
            mode: SyncMode::RefreshOnly,
        }
    }

    #[test]
    fn replays_scripted_session() {
        let transport = MockTransport::new();
        transport.push_session(vec![
            SyncEvent::EntryAdded(Entry::new("cn=a")),
            SyncEvent::CookieAdvance(Cookie::from("c1")),
        ]);

        let session = transport.open_session(&request(None)).unwrap();
        assert!(!session.is_resumed());
        assert!(matches!(
            transport.next_event(&session).unwrap(),
            Some(SyncEvent::EntryAdded(_))
        ));
        assert!(transport.next_event(&session).unwrap().is_some());
        assert!(transport.next_event(&session).unwrap().is_none());

        transport.close_session(session).unwrap();
        assert_eq!(transport.closed_sessions(), vec![1]);
    }

    #[test]
    fn disconnect_is_reported() {
        let transport = MockTransport::new();
        transport.push_disconnecting_session(vec![SyncEvent::PresentPhaseBegin]);

        let session = transport.open_session(&request(Some("c1"))).unwrap();
        assert!(session.is_resumed());
        transport.next_event(&session).unwrap();
        assert!(matches!(
            transport.next_event(&session),
            Err(SyncError::Disconnected)
        ));
    }

    #[test]
    fn rejects_cookies_when_asked() {
        let transport = MockTransport::new();
        transport.push_session(Vec::new());
        transport.reject_cookies(true);

        assert!(matches!(
            transport.open_session(&request(Some("stale"))),
            Err(SyncError::CookieRejected)
        ));
        assert!(transport.open_session(&request(None)).is_ok());
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.remaining_sessions(), 0);
    }

    #[test]
    fn no_script_left_is_retryable() {
        let transport = MockTransport::new();
        let err = transport.open_session(&request(None)).unwrap_err();
        assert!(err.is_retryable());
    }
}
