//! Maps room identifiers to rooms and hands out connections

use crate::config::RoomConfig;
use crate::endpoint::Connection;
use crate::room::RoomHandle;
use crate::storage::{MemoryStore, SnapshotStore};
use log::{debug, info};
use shared::{RelayError, RoomId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Entry point in front of every room of a server
///
/// Rooms are created lazily on first lookup. A room is only forgotten once it
/// is dormant and nothing else refers to it, so all requests for one
/// identifier reach the same logical room, however often its coordinator is
/// evicted and resumed.
pub struct Gateway {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    config: Arc<RoomConfig>,
    store: Arc<dyn SnapshotStore>,
}

impl Gateway {
    /// Creates a gateway keeping room snapshots in memory
    pub fn new(config: RoomConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: RoomConfig, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Returns the room for `room`, creating it on first use
    pub fn resolve(&self, room: &RoomId) -> RoomHandle {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = rooms.get(room) {
            return handle.clone();
        }

        // Checked under the map lock, so no handle can be cloned meanwhile
        rooms.retain(|id, handle| {
            let keep = !handle.is_reclaimable();
            if !keep {
                debug!("Forgetting dormant room {}", id);
            }
            keep
        });

        info!("Created room {}", room);
        let handle = RoomHandle::new(room.clone(), Arc::clone(&self.config), Arc::clone(&self.store));
        rooms.insert(room.clone(), handle.clone());
        handle
    }

    /// Returns the room for `room` if it exists, without creating it
    pub fn find(&self, room: &RoomId) -> Option<RoomHandle> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
    }

    /// Validates `room_id` and joins `player_name` to that room
    pub async fn request_connection(
        &self,
        room_id: &str,
        player_name: &str,
    ) -> Result<Connection, RelayError> {
        let room = RoomId::parse(room_id)?;
        debug!("Connection requested for {:?} in room {}", player_name, room);

        self.resolve(&room).join(player_name).await
    }

    /// Number of rooms currently known to the gateway
    pub fn room_count(&self) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Outbound;
    use shared::Frame;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_invalid_identifier_never_reaches_a_room() {
        let gateway = Gateway::new(RoomConfig::default());

        let result = gateway.request_connection("not-valid-id!", "alice").await;

        assert!(matches!(result, Err(RelayError::InvalidIdentifier(_))));
        assert_eq!(gateway.room_count(), 0);
    }

    #[tokio::test]
    async fn test_same_identifier_resolves_to_same_room() {
        let gateway = Gateway::new(RoomConfig::default());

        let _a = assert_ok!(gateway.request_connection("1a2b3c", "alice").await);
        let _b = assert_ok!(gateway.request_connection("1a2b3c", "bob").await);
        let _c = assert_ok!(gateway.request_connection("1a2b3c", "carol").await);

        let room = gateway.resolve(&RoomId::parse("1a2b3c").unwrap());
        assert_eq!(room.count().await.unwrap(), 3);
        assert_eq!(gateway.room_count(), 1);
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let gateway = Gateway::new(RoomConfig::default());

        let mut a = gateway.request_connection("aaaa", "alice").await.unwrap();
        let _b = gateway.request_connection("bbbb", "bob").await.unwrap();
        let _c = gateway.request_connection("bbbb", "carol").await.unwrap();

        a.send(Frame::text("ping")).unwrap();

        assert_eq!(
            a.recv().await,
            Some(Outbound::Frame(Frame::text(
                "[Durable Object] message: ping, connections: 1"
            )))
        );
        assert_eq!(gateway.room_count(), 2);
    }

    #[tokio::test]
    async fn test_find_does_not_create_rooms() {
        let gateway = Gateway::new(RoomConfig::default());
        let room = RoomId::parse("beef").unwrap();

        assert!(gateway.find(&room).is_none());
        assert_eq!(gateway.room_count(), 0);

        let _a = gateway.request_connection("beef", "alice").await.unwrap();
        assert_eq!(gateway.find(&room).unwrap().member_count(), 1);
    }

    #[tokio::test]
    async fn test_dormant_rooms_are_forgotten() {
        let gateway = Gateway::new(RoomConfig::default());
        let mut a = gateway.request_connection("aaaa", "alice").await.unwrap();
        let _b = gateway.request_connection("bbbb", "bob").await.unwrap();

        a.close(1000, "bye").unwrap();
        assert!(matches!(a.recv().await, Some(Outbound::Close { .. })));
        drop(a);

        let emptied = gateway.find(&RoomId::parse("aaaa").unwrap()).unwrap();
        for _ in 0..200 {
            if !emptied.is_resident() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        drop(emptied);

        let _c = gateway.request_connection("cccc", "carol").await.unwrap();

        assert_eq!(gateway.room_count(), 2);
        assert!(gateway.find(&RoomId::parse("aaaa").unwrap()).is_none());
        assert!(gateway.find(&RoomId::parse("bbbb").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_room_survives_suspension_between_requests() {
        let gateway = Gateway::new(RoomConfig::default());
        let _a = gateway.request_connection("cafe", "alice").await.unwrap();

        let room = gateway.resolve(&RoomId::parse("cafe").unwrap());
        room.suspend().unwrap();

        let _b = gateway.request_connection("cafe", "bob").await.unwrap();
        assert_eq!(room.count().await.unwrap(), 2);
    }
}
