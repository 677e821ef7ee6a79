//! Addressable room: event queue, socket table and residency of its coordinator
//!
//! A [`RoomHandle`] is the stable address of one room. Everything behind it
//! that must outlive an eviction lives in the shared slot: the event queue,
//! the table of open connection handles, the connection id counter and the
//! stored snapshot. The coordinator task itself is disposable. When it evicts
//! itself it parks the queue receiver in the slot; the next dispatched event
//! takes the receiver back and spawns a fresh coordinator, which rebuilds its
//! roster from the snapshot and the socket table. Events sent in between wait
//! in the queue in arrival order.

use crate::config::RoomConfig;
use crate::coordinator;
use crate::endpoint::{Connection, ConnectionHandle, ConnectionId};
use crate::roster::PlayerRecord;
use crate::storage::SnapshotStore;
use log::warn;
use shared::{Frame, RelayError, RoomId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

/// Work items processed one at a time by a room's coordinator
#[derive(Debug)]
pub enum RoomEvent {
    Join {
        name: String,
        reply: oneshot::Sender<Result<Connection, RelayError>>,
    },
    Message {
        connection: ConnectionId,
        frame: Frame,
    },
    Close {
        connection: ConnectionId,
        code: u16,
        reason: String,
    },
    Broadcast {
        frame: Frame,
        excluding: Option<ConnectionId>,
        reply: Option<oneshot::Sender<BroadcastReport>>,
    },
    SetReady {
        connection: ConnectionId,
        ready: bool,
    },
    Inspect {
        reply: oneshot::Sender<Vec<PlayerRecord>>,
    },
    Evict,
}

/// Outcome of a broadcast, per recipient
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<ConnectionId>,
    /// Recipients that could not be reached; they were removed from the roster
    pub failed: Vec<ConnectionId>,
}

/// Logical state of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Dormant,
    Active,
}

struct RoomSlot {
    id: RoomId,
    config: Arc<RoomConfig>,
    store: Arc<dyn SnapshotStore>,
    /// Queue receiver while no coordinator is resident
    parked: Mutex<Option<mpsc::UnboundedReceiver<RoomEvent>>>,
    /// Open connections, kept across evictions
    sockets: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_connection_id: AtomicU64,
    members: AtomicUsize,
    resident: AtomicBool,
    generation: AtomicU64,
}

/// Cheaply cloneable address of one room
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomEvent>,
    slot: Arc<RoomSlot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RoomHandle {
    /// Creates a dormant room; its coordinator starts with the first event
    pub fn new(id: RoomId, config: Arc<RoomConfig>, store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let slot = RoomSlot {
            id,
            config,
            store,
            parked: Mutex::new(Some(rx)),
            sockets: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            members: AtomicUsize::new(0),
            resident: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        };

        Self {
            tx,
            slot: Arc::new(slot),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.slot.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.slot.config
    }

    pub(crate) fn store(&self) -> &dyn SnapshotStore {
        self.slot.store.as_ref()
    }

    /// Queues an event and makes sure a coordinator is there to handle it
    pub fn dispatch(&self, event: RoomEvent) -> Result<(), RelayError> {
        self.tx
            .send(event)
            .map_err(|_| RelayError::RoomUnavailable(self.slot.id.to_string()))?;
        self.wake();
        Ok(())
    }

    fn wake(&self) {
        let mut parked = lock(&self.slot.parked);
        let Some(events) = parked.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                self.slot.resident.store(true, Ordering::SeqCst);
                self.slot.generation.fetch_add(1, Ordering::SeqCst);
                runtime.spawn(coordinator::run(self.clone(), events));
            }
            Err(_) => {
                warn!(
                    "Room {}: no runtime to resume coordinator, event stays queued",
                    self.slot.id
                );
                *parked = Some(events);
            }
        }
    }

    /// Hands the queue back to the slot unless an event is already waiting
    pub(crate) fn park(
        &self,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
    ) -> Result<(), (mpsc::UnboundedReceiver<RoomEvent>, RoomEvent)> {
        let mut parked = lock(&self.slot.parked);

        match events.try_recv() {
            Ok(pending) => Err((events, pending)),
            Err(_) => {
                self.slot.resident.store(false, Ordering::SeqCst);
                *parked = Some(events);
                Ok(())
            }
        }
    }

    /// Takes the parked queue so no coordinator can be started behind a test's back
    #[cfg(test)]
    pub(crate) fn detach_queue(&self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        lock(&self.slot.parked).take()
    }

    pub(crate) fn allocate_connection_id(&self) -> ConnectionId {
        ConnectionId(self.slot.next_connection_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn register_socket(&self, handle: ConnectionHandle) {
        lock(&self.slot.sockets).insert(handle.id(), handle);
    }

    pub(crate) fn unregister_socket(&self, connection: ConnectionId) -> Option<ConnectionHandle> {
        lock(&self.slot.sockets).remove(&connection)
    }

    pub(crate) fn sockets(&self) -> HashMap<ConnectionId, ConnectionHandle> {
        lock(&self.slot.sockets).clone()
    }

    pub(crate) fn publish_members(&self, count: usize) {
        self.slot.members.store(count, Ordering::SeqCst);
    }

    /// Roster size as of the last processed event
    pub fn member_count(&self) -> usize {
        self.slot.members.load(Ordering::SeqCst)
    }

    /// Number of open connections the transport keeps for this room
    pub fn open_sockets(&self) -> usize {
        lock(&self.slot.sockets).len()
    }

    pub fn phase(&self) -> RoomPhase {
        if self.member_count() > 0 {
            RoomPhase::Active
        } else {
            RoomPhase::Dormant
        }
    }

    /// Whether a coordinator task currently holds the room in memory
    pub fn is_resident(&self) -> bool {
        self.slot.resident.load(Ordering::SeqCst)
    }

    /// Whether nothing but this handle refers to the room any more
    ///
    /// Holds for a dormant room with no coordinator, no open sockets and no
    /// other handle; such a room can be forgotten and recreated from scratch.
    pub(crate) fn is_reclaimable(&self) -> bool {
        self.phase() == RoomPhase::Dormant
            && !self.is_resident()
            && self.open_sockets() == 0
            && Arc::strong_count(&self.slot) == 1
    }

    /// How many coordinators have been started for this room so far
    pub fn generation(&self) -> u64 {
        self.slot.generation.load(Ordering::SeqCst)
    }

    /// Adds a player and returns the caller half of its connection
    pub async fn join(&self, name: &str) -> Result<Connection, RelayError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(RoomEvent::Join {
            name: name.to_string(),
            reply,
        })?;

        response.await.map_err(|_| self.unavailable())?
    }

    /// Sends `frame` to every player except `excluding`
    pub async fn broadcast(
        &self,
        frame: Frame,
        excluding: Option<ConnectionId>,
    ) -> Result<BroadcastReport, RelayError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(RoomEvent::Broadcast {
            frame,
            excluding,
            reply: Some(reply),
        })?;

        response.await.map_err(|_| self.unavailable())
    }

    pub fn set_ready(&self, connection: ConnectionId, ready: bool) -> Result<(), RelayError> {
        self.dispatch(RoomEvent::SetReady { connection, ready })
    }

    /// Players in join order
    pub async fn roster(&self) -> Result<Vec<PlayerRecord>, RelayError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(RoomEvent::Inspect { reply })?;

        response.await.map_err(|_| self.unavailable())
    }

    pub async fn count(&self) -> Result<usize, RelayError> {
        Ok(self.roster().await?.len())
    }

    /// Asks the coordinator to leave memory; open connections stay open
    pub fn suspend(&self) -> Result<(), RelayError> {
        self.dispatch(RoomEvent::Evict)
    }

    fn unavailable(&self) -> RelayError {
        RelayError::RoomUnavailable(self.slot.id.to_string())
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("id", &self.slot.id)
            .field("members", &self.member_count())
            .field("resident", &self.is_resident())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn test_room() -> RoomHandle {
        let id = RoomId::parse("d00d").unwrap();
        RoomHandle::new(id, Arc::new(RoomConfig::default()), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_new_room_is_dormant() {
        let room = test_room();

        assert_eq!(room.id().as_str(), "d00d");
        assert_eq!(room.phase(), RoomPhase::Dormant);
        assert!(!room.is_resident());
        assert_eq!(room.generation(), 0);
        assert_eq!(room.open_sockets(), 0);
    }

    #[test]
    fn test_dispatch_without_runtime_keeps_event_queued() {
        let room = test_room();

        room.suspend().unwrap();

        assert!(!room.is_resident());
        assert_eq!(room.generation(), 0);
    }

    #[test]
    fn test_connection_ids_are_monotonic() {
        let room = test_room();
        let first = room.allocate_connection_id();
        let second = room.allocate_connection_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_first_event_starts_coordinator() {
        let room = test_room();

        assert_eq!(room.count().await.unwrap(), 0);
        assert_eq!(room.generation(), 1);
    }

    #[tokio::test]
    async fn test_events_queued_without_runtime_are_replayed() {
        let room = test_room();
        let queued = room.clone();

        std::thread::spawn(move || queued.set_ready(ConnectionId(1), true))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(room.generation(), 0);

        let (reply, response) = oneshot::channel();
        room.dispatch(RoomEvent::Inspect { reply }).unwrap();

        assert!(response.await.unwrap().is_empty());
        assert_eq!(room.generation(), 1);
    }
}
