//! Live player roster of a single room
//!
//! The roster keeps players in join order together with the connection each
//! of them owns. It is only ever touched by the room's coordinator task, so
//! every operation is synchronous and lock-free. Iteration hands out a copy,
//! which lets callers remove entries while walking the previous state.

use crate::endpoint::{ConnectionHandle, ConnectionId};
use log::info;
use serde::{Deserialize, Serialize};

/// A player connected to the room
#[derive(Debug, Clone)]
pub struct PlayerEntry {
    /// Display name, not necessarily unique
    pub name: String,
    /// Room-side half of the player's connection
    pub connection: ConnectionHandle,
    /// Whether the player signalled readiness
    pub ready: bool,
}

impl PlayerEntry {
    /// Creates an entry for a freshly joined player; players start not ready
    pub fn new(name: impl Into<String>, connection: ConnectionHandle) -> Self {
        Self {
            name: name.into(),
            connection,
            ready: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Serializable view of the entry without the live handle
    pub fn record(&self) -> PlayerRecord {
        PlayerRecord {
            name: self.name.clone(),
            connection: self.id(),
            ready: self.ready,
        }
    }
}

/// Plain-data view of a roster entry, used for inspection and snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    pub connection: ConnectionId,
    pub ready: bool,
}

/// Ordered set of players currently in a room
#[derive(Debug, Default)]
pub struct Roster {
    /// Entries in join order
    entries: Vec<PlayerEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuilds a roster from entries already in join order
    pub fn from_entries(entries: Vec<PlayerEntry>) -> Self {
        Self { entries }
    }

    /// Appends a player at the end of the join order
    pub fn add(&mut self, entry: PlayerEntry) {
        info!(
            "Player {:?} joined on connection {}",
            entry.name,
            entry.id()
        );
        self.entries.push(entry);
    }

    /// Removes the entry owning `connection`
    ///
    /// Returns the removed entry, or None if it was already gone. Removing
    /// an unknown connection is not an error so close handling stays
    /// idempotent.
    pub fn remove_by_handle(&mut self, connection: ConnectionId) -> Option<PlayerEntry> {
        let index = self.entries.iter().position(|e| e.id() == connection)?;
        let entry = self.entries.remove(index);
        info!("Player {:?} left (connection {})", entry.name, connection);
        Some(entry)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the entries in join order
    pub fn iterate(&self) -> Vec<PlayerEntry> {
        self.entries.clone()
    }

    pub fn find(&self, connection: ConnectionId) -> Option<&PlayerEntry> {
        self.entries.iter().find(|e| e.id() == connection)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Updates the readiness flag, returning false for unknown connections
    pub fn set_ready(&mut self, connection: ConnectionId, ready: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.id() == connection) {
            Some(entry) => {
                entry.ready = ready;
                true
            }
            None => false,
        }
    }

    pub fn records(&self) -> Vec<PlayerRecord> {
        self.entries.iter().map(PlayerEntry::record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::endpoint::{pair, Connection};
    use crate::room::RoomHandle;
    use crate::storage::MemoryStore;
    use shared::RoomId;
    use std::sync::Arc;

    fn test_room() -> RoomHandle {
        let id = RoomId::parse("0ff1ce").unwrap();
        RoomHandle::new(id, Arc::new(RoomConfig::default()), Arc::new(MemoryStore::new()))
    }

    fn test_entry(room: &RoomHandle, id: u64, name: &str) -> (PlayerEntry, Connection) {
        let (handle, connection) = pair(ConnectionId(id), room.clone());
        (PlayerEntry::new(name, handle), connection)
    }

    #[tokio::test]
    async fn test_entry_creation() {
        let room = test_room();
        let (entry, _connection) = test_entry(&room, 1, "alice");

        assert_eq!(entry.name, "alice");
        assert_eq!(entry.id(), ConnectionId(1));
        assert!(!entry.ready);
    }

    #[tokio::test]
    async fn test_roster_creation() {
        let roster = Roster::new();
        assert!(roster.is_empty());
        assert_eq!(roster.count(), 0);
    }

    #[tokio::test]
    async fn test_add_keeps_join_order() {
        let room = test_room();
        let mut roster = Roster::new();
        let (a, _ca) = test_entry(&room, 1, "alice");
        let (b, _cb) = test_entry(&room, 2, "bob");
        let (c, _cc) = test_entry(&room, 3, "carol");

        roster.add(a);
        roster.add(b);
        roster.add(c);

        let names: Vec<String> = roster.iterate().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(roster.count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_names_are_allowed() {
        let room = test_room();
        let mut roster = Roster::new();
        let (a, _ca) = test_entry(&room, 1, "same");
        let (b, _cb) = test_entry(&room, 2, "same");

        roster.add(a);
        roster.add(b);

        assert_eq!(roster.count(), 2);
        assert!(roster.contains_name("same"));
        assert!(!roster.contains_name("other"));
    }

    #[tokio::test]
    async fn test_remove_by_handle() {
        let room = test_room();
        let mut roster = Roster::new();
        let (a, _ca) = test_entry(&room, 1, "alice");
        let (b, _cb) = test_entry(&room, 2, "bob");
        roster.add(a);
        roster.add(b);

        let removed = roster.remove_by_handle(ConnectionId(1)).unwrap();
        assert_eq!(removed.name, "alice");
        assert_eq!(roster.count(), 1);
        assert!(roster.find(ConnectionId(1)).is_none());
        assert!(roster.find(ConnectionId(2)).is_some());
    }

    #[tokio::test]
    async fn test_remove_unknown_handle_is_noop() {
        let room = test_room();
        let mut roster = Roster::new();
        let (a, _ca) = test_entry(&room, 1, "alice");
        roster.add(a);

        assert!(roster.remove_by_handle(ConnectionId(99)).is_none());
        assert!(roster.remove_by_handle(ConnectionId(1)).is_some());
        assert!(roster.remove_by_handle(ConnectionId(1)).is_none());
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_iterate_is_a_snapshot() {
        let room = test_room();
        let mut roster = Roster::new();
        let mut connections = Vec::new();
        for id in 1..=4 {
            let (entry, connection) = test_entry(&room, id, &format!("p{}", id));
            roster.add(entry);
            connections.push(connection);
        }

        let snapshot = roster.iterate();
        for entry in &snapshot {
            roster.remove_by_handle(entry.id());
        }

        assert_eq!(snapshot.len(), 4);
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_set_ready() {
        let room = test_room();
        let mut roster = Roster::new();
        let (a, _ca) = test_entry(&room, 1, "alice");
        roster.add(a);

        assert!(roster.set_ready(ConnectionId(1), true));
        assert!(roster.find(ConnectionId(1)).unwrap().ready);
        assert!(!roster.set_ready(ConnectionId(2), true));
    }

    #[tokio::test]
    async fn test_records() {
        let room = test_room();
        let mut roster = Roster::new();
        let (a, _ca) = test_entry(&room, 5, "alice");
        roster.add(a);
        roster.set_ready(ConnectionId(5), true);

        assert_eq!(
            roster.records(),
            vec![PlayerRecord {
                name: "alice".to_string(),
                connection: ConnectionId(5),
                ready: true,
            }]
        );
    }
}
