//! Duplex channel between one caller and its room
//!
//! A connection is created as a pair: the [`ConnectionHandle`] stays with the
//! room (roster entry and socket table) and the [`Connection`] goes to whoever
//! requested it. Frames written by the caller are queued as room events, so
//! they survive the coordinator being evicted and are delivered in order once
//! it is reconstructed. Frames written by the room go straight to the caller's
//! receive queue.

use crate::room::{RoomEvent, RoomHandle};
use log::debug;
use serde::{Deserialize, Serialize};
use shared::{close_code, Frame, RelayError, RoomId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Identity of one connection, unique within its room for the room's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something the room sends down to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close { code: u16, reason: String },
}

/// Room-side half of a connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame for the caller
    ///
    /// Fails once the handle was closed, the caller half has been dropped or
    /// the caller stopped draining its queue.
    pub fn send(&self, frame: Frame) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.failure("connection closed"));
        }

        self.push(Outbound::Frame(frame))
    }

    /// Sends the close acknowledgment and marks the handle closed
    ///
    /// Closing twice is a no-op.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), RelayError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.push(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn push(&self, outbound: Outbound) -> Result<(), RelayError> {
        self.tx.try_send(outbound).map_err(|e| match e {
            TrySendError::Full(_) => self.failure("outbound queue full"),
            TrySendError::Closed(_) => self.failure("peer dropped"),
        })
    }

    fn failure(&self, reason: &str) -> RelayError {
        RelayError::TransportFailure {
            connection: self.id.0,
            reason: reason.to_string(),
        }
    }
}

/// Caller-side half of a connection
///
/// Dropping it without calling [`Connection::close`] reports an abnormal
/// close (code 1006) to the room.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    room: RoomHandle,
    rx: mpsc::Receiver<Outbound>,
    closing: bool,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn room_id(&self) -> &RoomId {
        self.room.id()
    }

    /// Delivers a frame to the room's message handler
    pub fn send(&self, frame: Frame) -> Result<(), RelayError> {
        if self.closing {
            return Err(RelayError::TransportFailure {
                connection: self.id.0,
                reason: "connection closing".to_string(),
            });
        }

        self.room.dispatch(RoomEvent::Message {
            connection: self.id,
            frame,
        })
    }

    /// Asks the room to close this connection; repeated calls are ignored
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), RelayError> {
        if self.closing {
            return Ok(());
        }
        self.closing = true;

        self.room.dispatch(RoomEvent::Close {
            connection: self.id,
            code,
            reason: reason.to_string(),
        })
    }

    /// Next frame or close from the room; `None` once the room dropped the handle
    pub async fn recv(&mut self) -> Option<Outbound> {
        let outbound = self.rx.recv().await;
        if let Some(Outbound::Close { .. }) = outbound {
            self.closing = true;
        }
        outbound
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        let outbound = self.rx.try_recv().ok();
        if let Some(Outbound::Close { .. }) = outbound {
            self.closing = true;
        }
        outbound
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closing {
            return;
        }

        debug!("Connection {} dropped without close", self.id);
        let _ = self.room.dispatch(RoomEvent::Close {
            connection: self.id,
            code: close_code::ABNORMAL,
            reason: String::new(),
        });
    }
}

/// Creates both halves of a connection belonging to `room`
///
/// The caller's receive queue holds at most `outbound_buffer` items of the
/// room's config.
pub(crate) fn pair(id: ConnectionId, room: RoomHandle) -> (ConnectionHandle, Connection) {
    let (tx, rx) = mpsc::channel(room.config().outbound_buffer.max(1));

    let handle = ConnectionHandle {
        id,
        tx,
        closed: Arc::new(AtomicBool::new(false)),
    };

    let connection = Connection {
        id,
        room,
        rx,
        closing: false,
    };

    (handle, connection)
}
