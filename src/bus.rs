//! Outbound message delivery.
//!
//! The engine never talks to sockets. It hands finished text lines to a
//! [`MessageBus`], and the transport in front of the server decides how they
//! reach clients. Two implementations ship with the crate:
//!
//! - [`ChannelBus`]: per-connection tokio channels with a room index,
//!   suitable for wiring a real transport loop
//! - [`RecordingBus`]: captures emissions in memory (for development/testing)

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Publish/subscribe contract consumed by the engine.
///
/// Delivery is best-effort and fire-and-forget: the engine commits its state
/// transition first, then emits. A failed send is a disconnected client, not
/// an engine error.
pub trait MessageBus: Send + Sync {
    /// Deliver to every connection currently subscribed to the room.
    fn emit_to_room(&self, room_id: &str, message: &str);

    /// Deliver to a single connection.
    fn emit_to_connection(&self, session_id: u64, message: &str);

    /// Deliver to every registered connection.
    fn broadcast_all(&self, message: &str);

    /// Track a room subscription. Buses without per-room state ignore this.
    fn subscribe(&self, _room_id: &str, _session_id: u64) {}

    /// Drop a room subscription.
    fn unsubscribe(&self, _room_id: &str, _session_id: u64) {}
}

/// Channel-backed bus.
///
/// Each connection registers an unbounded outbox; the transport drains the
/// paired receiver. Room fan-out uses a subscription index maintained through
/// the trait's subscribe/unsubscribe calls as the engine moves connections
/// between rooms.
pub struct ChannelBus {
    outboxes: DashMap<u64, UnboundedSender<String>>,
    rooms: DashMap<String, HashSet<u64>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self {
            outboxes: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a connection and get the receiving half of its outbox.
    pub fn register(&self, session_id: u64) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        self.outboxes.insert(session_id, tx);
        rx
    }

    /// Drop a connection's outbox and all its room subscriptions.
    pub fn unregister(&self, session_id: u64) {
        self.outboxes.remove(&session_id);
        for mut members in self.rooms.iter_mut() {
            members.remove(&session_id);
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for ChannelBus {
    fn emit_to_room(&self, room_id: &str, message: &str) {
        if let Some(members) = self.rooms.get(room_id) {
            for session_id in members.iter() {
                if let Some(tx) = self.outboxes.get(session_id) {
                    let _ = tx.send(message.to_string());
                }
            }
        }
    }

    fn emit_to_connection(&self, session_id: u64, message: &str) {
        if let Some(tx) = self.outboxes.get(&session_id) {
            let _ = tx.send(message.to_string());
        }
    }

    fn broadcast_all(&self, message: &str) {
        for tx in self.outboxes.iter() {
            let _ = tx.send(message.to_string());
        }
    }

    fn subscribe(&self, room_id: &str, session_id: u64) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id);
    }

    fn unsubscribe(&self, room_id: &str, session_id: u64) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(&session_id);
        }
    }
}

/// Where a recorded emission was addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Room(String),
    Connection(u64),
    All,
}

/// In-memory bus that records every emission (for development/testing).
pub struct RecordingBus {
    emissions: Mutex<Vec<(Target, String)>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            emissions: Mutex::new(Vec::new()),
        }
    }

    /// All emissions so far, in order.
    pub fn emissions(&self) -> Vec<(Target, String)> {
        self.emissions.lock().clone()
    }

    /// Messages addressed to a specific connection.
    pub fn messages_to(&self, session_id: u64) -> Vec<String> {
        self.emissions
            .lock()
            .iter()
            .filter(|(t, _)| *t == Target::Connection(session_id))
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Messages addressed to a specific room.
    pub fn messages_in(&self, room_id: &str) -> Vec<String> {
        self.emissions
            .lock()
            .iter()
            .filter(|(t, _)| *t == Target::Room(room_id.to_string()))
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Clear the recording.
    pub fn clear(&self) {
        self.emissions.lock().clear();
    }
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for RecordingBus {
    fn emit_to_room(&self, room_id: &str, message: &str) {
        self.emissions
            .lock()
            .push((Target::Room(room_id.to_string()), message.to_string()));
    }

    fn emit_to_connection(&self, session_id: u64, message: &str) {
        self.emissions
            .lock()
            .push((Target::Connection(session_id), message.to_string()));
    }

    fn broadcast_all(&self, message: &str) {
        self.emissions.lock().push((Target::All, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_bus_room_fanout() {
        let bus = ChannelBus::new();
        let mut rx1 = bus.register(1);
        let mut rx2 = bus.register(2);
        let mut rx3 = bus.register(3);

        bus.subscribe("lobby", 1);
        bus.subscribe("lobby", 2);

        bus.emit_to_room("lobby", "hello");

        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_channel_bus_unsubscribe() {
        let bus = ChannelBus::new();
        let mut rx = bus.register(1);

        bus.subscribe("lobby", 1);
        bus.unsubscribe("lobby", 1);
        bus.emit_to_room("lobby", "hello");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_bus_unregister_clears_subscriptions() {
        let bus = ChannelBus::new();
        let _rx = bus.register(1);
        bus.subscribe("lobby", 1);

        bus.unregister(1);
        assert_eq!(bus.connection_count(), 0);

        // Emitting to a room with a stale member must not panic.
        bus.emit_to_room("lobby", "hello");
    }

    #[test]
    fn test_channel_bus_broadcast_all() {
        let bus = ChannelBus::new();
        let mut rx1 = bus.register(1);
        let mut rx2 = bus.register(2);

        bus.broadcast_all("announcement");

        assert_eq!(rx1.try_recv().unwrap(), "announcement");
        assert_eq!(rx2.try_recv().unwrap(), "announcement");
    }

    #[test]
    fn test_recording_bus_filters() {
        let bus = RecordingBus::new();
        bus.emit_to_connection(7, "private");
        bus.emit_to_room("lobby", "public");
        bus.broadcast_all("global");

        assert_eq!(bus.messages_to(7), vec!["private"]);
        assert_eq!(bus.messages_in("lobby"), vec!["public"]);
        assert_eq!(bus.emissions().len(), 3);
    }
}
