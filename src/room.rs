//! Room directory.

use std::collections::HashSet;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::DuelNetError;

/// The permanent default room. Every connection starts here and returns here
/// after a game ends.
pub const LOBBY: &str = "lobby";

/// A chat room.
pub struct Room {
    pub id: String,
    pub members: RwLock<HashSet<u64>>,
    pub created_at: Instant,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(HashSet::new()),
            created_at: Instant::now(),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn has_member(&self, session_id: u64) -> bool {
        self.members.read().contains(&session_id)
    }

    pub fn member_ids(&self) -> Vec<u64> {
        self.members.read().iter().copied().collect()
    }
}

/// Room errors.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    NotFound(String),

    #[error("the lobby cannot be destroyed")]
    LobbyIndestructible,
}

impl From<RoomError> for DuelNetError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound(id) => DuelNetError::not_found(format!("room '{id}'")),
            RoomError::LobbyIndestructible => {
                DuelNetError::invalid_state("the lobby cannot be destroyed")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RoomError>;

/// Room directory.
///
/// The lobby exists from construction and is never removed. Game rooms are
/// uuid-named and live only as long as the session they host.
pub struct RoomDirectory {
    rooms: DashMap<String, Room>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        let rooms = DashMap::new();
        rooms.insert(LOBBY.to_string(), Room::new(LOBBY));
        Self { rooms }
    }

    /// Create a room with a fresh uuid id.
    pub fn create_game_room(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.rooms.insert(id.clone(), Room::new(id.clone()));
        id
    }

    /// Create a room with a chosen id. Returns false if the id is taken.
    pub fn create_room(&self, id: &str) -> bool {
        if self.rooms.contains_key(id) {
            return false;
        }
        self.rooms.insert(id.to_string(), Room::new(id));
        true
    }

    /// Destroy a room. The lobby is indestructible.
    pub fn destroy_room(&self, id: &str) -> Result<Room> {
        if id == LOBBY {
            return Err(RoomError::LobbyIndestructible);
        }
        self.rooms
            .remove(id)
            .map(|(_, r)| r)
            .ok_or_else(|| RoomError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Room>> {
        self.rooms.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.rooms.len()
    }

    /// Add a session to a room's member set.
    pub fn add_member(&self, room_id: &str, session_id: u64) -> Result<()> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        room.members.write().insert(session_id);
        Ok(())
    }

    /// Remove a session from a room's member set.
    pub fn remove_member(&self, room_id: &str, session_id: u64) {
        if let Some(room) = self.rooms.get(room_id) {
            room.members.write().remove(&session_id);
        }
    }

    /// Move a session between rooms: removed from the source set, added to
    /// the destination set. The caller updates the session's room reference
    /// in the same action.
    pub fn move_member(&self, session_id: u64, from: &str, to: &str) -> Result<()> {
        if !self.rooms.contains_key(to) {
            return Err(RoomError::NotFound(to.to_string()));
        }
        self.remove_member(from, session_id);
        self.add_member(to, session_id)
    }

    pub fn members_of(&self, room_id: &str) -> Vec<u64> {
        self.rooms
            .get(room_id)
            .map(|r| r.member_ids())
            .unwrap_or_default()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}
