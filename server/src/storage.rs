//! Roster snapshots that let a room survive eviction from memory

use crate::roster::PlayerRecord;
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use shared::{RelayError, RoomId};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Persisted state of an evicted room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    /// Players in join order
    pub players: Vec<PlayerRecord>,
}

impl RosterSnapshot {
    pub fn new(players: Vec<PlayerRecord>) -> Self {
        Self { players }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        serialize(self).map_err(|e| RelayError::Snapshot(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        deserialize(bytes).map_err(|e| RelayError::Snapshot(e.to_string()))
    }
}

/// Key-value storage for encoded room snapshots
pub trait SnapshotStore: Send + Sync + 'static {
    fn load(&self, room: &RoomId) -> Result<Option<Vec<u8>>, RelayError>;

    fn save(&self, room: &RoomId, snapshot: Vec<u8>) -> Result<(), RelayError>;

    fn delete(&self, room: &RoomId) -> Result<(), RelayError>;
}

/// In-process snapshot store
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<RoomId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, room: &RoomId) -> Result<Option<Vec<u8>>, RelayError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots.get(room).cloned())
    }

    fn save(&self, room: &RoomId, snapshot: Vec<u8>) -> Result<(), RelayError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(room.clone(), snapshot);
        Ok(())
    }

    fn delete(&self, room: &RoomId) -> Result<(), RelayError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.remove(room);
        Ok(())
    }
}
