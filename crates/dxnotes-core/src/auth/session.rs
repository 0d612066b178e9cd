//! In-memory session state shared by the credential transport, the request
//! pipeline and the navigation guard.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Short-lived bearer credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building the authorization header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Clone)]
pub struct SessionData {
    pub token: AccessToken,
    pub identity: Option<String>,
    pub authenticated_at: DateTime<Utc>,
}

/// Snapshot of the session as seen by observers.
///
/// `generation` increases on every mutation (and on teardown), so a task that
/// captured it before suspending can tell whether its view went stale.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    data: Option<SessionData>,
    generation: u64,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&SessionData> {
        self.data.as_ref()
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.data.as_ref().map(|d| &d.token)
    }

    pub fn identity(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.identity.as_deref())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Handle to the single session of this process.
/// Clone is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct Session {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Receive a notification every time the authenticated state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn token(&self) -> Option<AccessToken> {
        self.state.borrow().token().cloned()
    }

    pub fn identity(&self) -> Option<String> {
        self.state.borrow().identity().map(str::to_string)
    }

    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Current credential together with the generation it belongs to
    pub(crate) fn credential(&self) -> (u64, Option<AccessToken>) {
        let state = self.state.borrow();
        (state.generation, state.token().cloned())
    }

    /// Overwrite the session after a successful login
    pub(crate) fn set_authenticated(&self, token: AccessToken, identity: Option<String>) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            s.data = Some(SessionData {
                token,
                identity,
                authenticated_at: Utc::now(),
            });
            generation = s.generation;
        });
        generation
    }

    /// Install a refreshed credential unless the session changed since
    /// `expected` was read. Identity from the previous state is kept.
    pub(crate) fn refresh_if_current(&self, expected: u64, token: AccessToken) -> Option<u64> {
        let mut applied = None;
        self.state.send_if_modified(|s| {
            if s.generation != expected {
                return false;
            }
            let identity = s.data.as_ref().and_then(|d| d.identity.clone());
            s.generation += 1;
            s.data = Some(SessionData {
                token,
                identity,
                authenticated_at: Utc::now(),
            });
            applied = Some(s.generation);
            true
        });
        applied
    }

    /// Reset to anonymous. Clearing an empty session changes nothing.
    pub(crate) fn clear(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.data.is_none() {
                return false;
            }
            s.generation += 1;
            s.data = None;
            true
        })
    }

    /// End the session after a failed refresh, unless something replaced it
    /// since `expected`. The generation advances even when already anonymous,
    /// so requests queued behind the failed refresh see it and stop.
    /// Returns false if the session had moved on.
    pub(crate) fn end_if_current(&self, expected: u64) -> bool {
        let mut matched = false;
        self.state.send_if_modified(|s| {
            if s.generation != expected {
                return false;
            }
            matched = true;
            s.generation += 1;
            s.data.take().is_some()
        });
        matched
    }

    /// Clear and advance the generation even when already anonymous, so that
    /// any suspended refresh started before this point is discarded.
    pub(crate) fn invalidate(&self) {
        self.state.send_if_modified(|s| {
            s.generation += 1;
            s.data.take().is_some()
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.state.borrow())
            .finish()
    }
}
