//! Room coordinator: the single task that owns a room's roster
//!
//! Every join, frame, close and broadcast of a room goes through one queue and
//! is handled here in order, so the roster never needs a lock. The task runs
//! until the room goes idle:
//!
//! - the roster becomes empty (the room turns Dormant and its snapshot is
//!   dropped),
//! - no event arrived within the configured idle window, or
//! - an explicit eviction was requested.
//!
//! Before leaving memory a non-empty roster is written to the snapshot store.
//! The next coordinator for the room reads it back and re-attaches each entry
//! to its still-open connection handle.

use crate::config::DispatchMode;
use crate::endpoint::{self, Connection, ConnectionId};
use crate::room::{BroadcastReport, RoomEvent, RoomHandle};
use crate::roster::{PlayerEntry, Roster};
use crate::storage::RosterSnapshot;
use log::{debug, error, info, warn};
use shared::{close_code, echo_reply, Frame, RelayError, SERVER_CLOSE_REASON};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Outcome of waiting for the next event
enum Step {
    Event(RoomEvent),
    Idle,
    Closed,
}

pub(crate) struct Coordinator {
    room: RoomHandle,
    roster: Roster,
    /// Players dropped during restore whose queued frames may still arrive
    departed: HashSet<ConnectionId>,
}

/// Runs a coordinator for `room` until it evicts itself
pub(crate) async fn run(room: RoomHandle, mut events: mpsc::UnboundedReceiver<RoomEvent>) {
    let mut coordinator = Coordinator::restore(room.clone());
    let idle_eviction = room.config().idle_eviction;
    let mut pending = None;

    loop {
        let step = match pending.take() {
            Some(event) => Step::Event(event),
            None => next_step(&mut events, idle_eviction).await,
        };

        let evict = match step {
            Step::Event(RoomEvent::Evict) => true,
            Step::Event(event) => {
                coordinator.handle(event);
                coordinator.roster.is_empty()
            }
            Step::Idle => true,
            Step::Closed => {
                debug!("Room {}: event queue closed", room.id());
                return;
            }
        };

        if !evict || !coordinator.hibernate() {
            continue;
        }

        match room.park(events) {
            Ok(()) => {
                debug!(
                    "Room {} left memory with {} players",
                    room.id(),
                    coordinator.roster.count()
                );
                return;
            }
            Err((returned, event)) => {
                events = returned;
                pending = Some(event);
            }
        }
    }
}

async fn next_step(
    events: &mut mpsc::UnboundedReceiver<RoomEvent>,
    idle_eviction: Option<Duration>,
) -> Step {
    let received = match idle_eviction {
        Some(limit) => match timeout(limit, events.recv()).await {
            Ok(received) => received,
            Err(_) => return Step::Idle,
        },
        None => events.recv().await,
    };

    received.map(Step::Event).unwrap_or(Step::Closed)
}

impl Coordinator {
    /// Rebuilds the roster from the stored snapshot and the room's open sockets
    ///
    /// Snapshot entries whose connection closed in the meantime are dropped.
    /// Open sockets the snapshot does not know about are closed, so the roster
    /// and the socket table agree again.
    pub(crate) fn restore(room: RoomHandle) -> Self {
        let snapshot = match load_snapshot(&room) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Room {}: discarding unreadable snapshot: {}", room.id(), e);
                RosterSnapshot::default()
            }
        };

        let mut sockets = room.sockets();
        let mut entries = Vec::with_capacity(snapshot.players.len());
        let mut departed = HashSet::new();

        for record in snapshot.players {
            match sockets.remove(&record.connection) {
                Some(handle) if handle.is_open() => entries.push(PlayerEntry {
                    name: record.name,
                    connection: handle,
                    ready: record.ready,
                }),
                _ => {
                    debug!(
                        "Room {}: connection {} closed while evicted",
                        room.id(),
                        record.connection
                    );
                    room.unregister_socket(record.connection);
                    departed.insert(record.connection);
                }
            }
        }

        for (connection, handle) in sockets {
            warn!(
                "Room {}: closing connection {} missing from snapshot",
                room.id(),
                connection
            );
            let _ = handle.close(close_code::GOING_AWAY, SERVER_CLOSE_REASON);
            room.unregister_socket(connection);
        }

        if !entries.is_empty() {
            info!("Room {} restored with {} players", room.id(), entries.len());
        }

        let roster = Roster::from_entries(entries);
        room.publish_members(roster.count());

        Self {
            room,
            roster,
            departed,
        }
    }

    fn handle(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join { name, reply } => {
                let result = self.join(&name);
                if reply.send(result).is_err() {
                    debug!("Room {}: join requester for {:?} went away", self.room.id(), name);
                }
            }
            RoomEvent::Message { connection, frame } => self.on_message(connection, frame),
            RoomEvent::Close {
                connection,
                code,
                reason,
            } => self.on_close(connection, code, &reason),
            RoomEvent::Broadcast {
                frame,
                excluding,
                reply,
            } => {
                let report = self.broadcast(frame, excluding);
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            RoomEvent::SetReady { connection, ready } => {
                if !self.roster.set_ready(connection, ready) {
                    debug!("Room {}: ready flag for unknown connection {}", self.room.id(), connection);
                }
            }
            RoomEvent::Inspect { reply } => {
                let _ = reply.send(self.roster.records());
            }
            RoomEvent::Evict => {}
        }

        self.room.publish_members(self.roster.count());
    }

    fn join(&mut self, name: &str) -> Result<Connection, RelayError> {
        let config = self.room.config();

        if let Some(capacity) = config.max_players {
            if self.roster.count() >= capacity {
                return Err(RelayError::RoomFull {
                    room: self.room.id().to_string(),
                    capacity,
                });
            }
        }

        if config.unique_names && self.roster.contains_name(name) {
            return Err(RelayError::DuplicateName {
                room: self.room.id().to_string(),
                name: name.to_string(),
            });
        }

        let id = self.room.allocate_connection_id();
        let (handle, connection) = endpoint::pair(id, self.room.clone());
        self.room.register_socket(handle.clone());
        self.roster.add(PlayerEntry::new(name, handle));

        Ok(connection)
    }

    /// Replies to the author with the echo; in relay mode forwards to the rest
    ///
    /// A frame accepted before its author left is still relayed, even when
    /// the echo can no longer be delivered.
    fn on_message(&mut self, connection: ConnectionId, frame: Frame) {
        let relay = self.room.config().dispatch == DispatchMode::Relay;
        let sender = self.roster.find(connection).map(|e| e.connection.clone());

        if sender.is_none() && !(relay && self.departed.contains(&connection)) {
            debug!("Room {}: frame from unknown connection {}", self.room.id(), connection);
            return;
        }

        debug!(
            "Room {}: {} bytes from connection {}",
            self.room.id(),
            frame.len(),
            connection
        );

        let mut reply_failed = false;
        if let Some(sender) = sender {
            let reply = Frame::Text(echo_reply(&frame, self.roster.count()));
            if let Err(e) = sender.send(reply) {
                warn!("Room {}: {}", self.room.id(), e);
                reply_failed = true;
            }
        }

        if relay {
            self.broadcast(frame, Some(connection));
        }

        if reply_failed {
            self.on_close(connection, close_code::ABNORMAL, "reply not delivered");
        }
    }

    /// Removes the player owning `connection` and acknowledges the close
    ///
    /// Unknown connections are ignored, so closing twice is harmless.
    fn on_close(&mut self, connection: ConnectionId, code: u16, reason: &str) {
        self.departed.remove(&connection);
        let entry = self.roster.remove_by_handle(connection);
        let socket = self.room.unregister_socket(connection);

        let Some(handle) = entry.map(|e| e.connection).or(socket) else {
            debug!("Room {}: close for unknown connection {} ignored", self.room.id(), connection);
            return;
        };

        debug!(
            "Room {}: connection {} closed with code {} ({:?})",
            self.room.id(),
            connection,
            code,
            reason
        );

        if let Err(e) = handle.close(code, SERVER_CLOSE_REASON) {
            debug!("Room {}: close acknowledgment not delivered: {}", self.room.id(), e);
        }
    }

    /// Delivers `frame` to every player but `excluding`
    ///
    /// Recipients that cannot be reached are treated as disconnected and
    /// removed; they never stop delivery to the others.
    fn broadcast(&mut self, frame: Frame, excluding: Option<ConnectionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for entry in self.roster.iterate() {
            if Some(entry.id()) == excluding {
                continue;
            }

            match entry.connection.send(frame.clone()) {
                Ok(()) => report.delivered.push(entry.id()),
                Err(e) => {
                    warn!("Room {}: broadcast to {:?} failed: {}", self.room.id(), entry.name, e);
                    report.failed.push(entry.id());
                }
            }
        }

        for connection in &report.failed {
            self.on_close(*connection, close_code::ABNORMAL, "delivery failed");
        }

        report
    }

    /// Persists what a later coordinator needs; false if the room must stay resident
    fn hibernate(&self) -> bool {
        let store = self.room.store();
        let id = self.room.id();

        let result = if self.roster.is_empty() {
            store.delete(id)
        } else {
            RosterSnapshot::new(self.roster.records())
                .encode()
                .and_then(|bytes| store.save(id, bytes))
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Room {}: staying in memory, snapshot failed: {}", id, e);
                false
            }
        }
    }
}

fn load_snapshot(room: &RoomHandle) -> Result<RosterSnapshot, RelayError> {
    match room.store().load(room.id())? {
        Some(bytes) => RosterSnapshot::decode(&bytes),
        None => Ok(RosterSnapshot::default()),
    }
}
