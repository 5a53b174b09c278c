//! Connection presence tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate unique session ID
#[inline]
pub fn generate_session_id() -> u64 {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A connected client.
///
/// Starts out anonymous in the lobby; `username` is bound on login. Moderation
/// flags are per-connection and die with it.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    /// Bound account username, `None` until login.
    pub username: Option<String>,
    /// Current room. Every live session is in exactly one room.
    pub room_id: String,
    pub muted: bool,
    pub anonymous: bool,
    pub blocked: bool,
    pub created_at: Instant,
}

impl Session {
    pub fn new(lobby_id: impl Into<String>) -> Self {
        Self {
            id: generate_session_id(),
            username: None,
            room_id: lobby_id.into(),
            muted: false,
            anonymous: true,
            blocked: false,
            created_at: Instant::now(),
        }
    }

    /// Bind an account identity. Clears the anonymous flag.
    pub fn bind_identity(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
        self.anonymous = false;
    }

    /// The identity name used for ranking attribution.
    pub fn identity(&self) -> &str {
        self.username.as_deref().unwrap_or("Anonymous")
    }
}

/// Session registry
pub struct SessionRegistry {
    sessions: DashMap<u64, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn create(&self, lobby_id: &str) -> u64 {
        let session = Session::new(lobby_id);
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: u64) -> Option<dashmap::mapref::one::Ref<'_, u64, Session>> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&self, id: u64) -> Option<dashmap::mapref::one::RefMut<'_, u64, Session>> {
        self.sessions.get_mut(&id)
    }

    pub fn remove(&self, id: u64) -> Option<Session> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Resolve a username to a live session, if any.
    pub fn find_by_username(&self, username: &str) -> Option<u64> {
        self.sessions
            .iter()
            .find(|r| r.username.as_deref() == Some(username))
            .map(|r| *r.key())
    }

    /// All session IDs currently referencing a room.
    pub fn in_room(&self, room_id: &str) -> Vec<u64> {
        self.sessions
            .iter()
            .filter(|r| r.room_id == room_id)
            .map(|r| *r.key())
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
