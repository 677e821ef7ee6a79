use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Path prefix under which rooms are created and joined
pub const CREATE_ROUTE: &str = "/paranoia/create";

/// Prefix of every echo reply sent by a room
pub const ECHO_PREFIX: &str = "[Durable Object]";

/// Reason string used whenever the server closes its side of a connection
pub const SERVER_CLOSE_REASON: &str = "Durable Object is closing WebSocket";

/// WebSocket close codes used by the relay
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    /// Reserved: "no status received", never sent on the wire
    pub const NO_STATUS: u16 = 1005;
    /// Reserved: connection dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Reserved: TLS handshake failure
    pub const TLS_HANDSHAKE: u16 = 1015;

    /// Returns true if the code may appear in a close frame on the wire
    pub fn is_sendable(code: u16) -> bool {
        !matches!(code, NO_STATUS | ABNORMAL | TLS_HANDSHAKE) && (1000..5000).contains(&code)
    }

    /// Replaces codes that cannot be written to a socket with `NORMAL`
    pub fn sendable(code: u16) -> u16 {
        if is_sendable(code) {
            code
        } else {
            NORMAL
        }
    }
}

/// Errors produced while routing connections and frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Invalid UUID format: {0:?}")]
    InvalidIdentifier(String),

    #[error("No route for {0}")]
    NotFound(String),

    #[error("Room {room} is full ({capacity} players)")]
    RoomFull { room: String, capacity: usize },

    #[error("Player name {name:?} is already taken in room {room}")]
    DuplicateName { room: String, name: String },

    #[error("Transport failure on connection {connection}: {reason}")]
    TransportFailure { connection: u64, reason: String },

    #[error("Room {0} is unavailable")]
    RoomUnavailable(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl RelayError {
    /// HTTP status the gateway answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::InvalidIdentifier(_) => 400,
            RelayError::NotFound(_) => 404,
            RelayError::RoomFull { .. } | RelayError::DuplicateName { .. } => 409,
            RelayError::RoomUnavailable(_) => 503,
            RelayError::TransportFailure { .. } | RelayError::Snapshot(_) => 500,
        }
    }
}

/// Name of a room, restricted to hex digits and dashes (case-insensitive)
///
/// The identifier is kept exactly as given: `ABC` and `abc` are both valid
/// and address different rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let valid = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_hexdigit() || c == '-');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(RelayError::InvalidIdentifier(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Gateway path that joins this room
    pub fn create_path(&self) -> String {
        format!("{}/{}", CREATE_ROUTE, self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomId::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

/// One opaque payload travelling over a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn text(content: impl Into<String>) -> Self {
        Frame::Text(content.into())
    }

    /// Payload rendered as text; binary payloads are decoded lossily
    pub fn to_text(&self) -> String {
        match self {
            Frame::Text(text) => text.clone(),
            Frame::Binary(data) => String::from_utf8_lossy(data).into_owned(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Formats the reply a room sends back to the author of a frame
pub fn echo_reply(frame: &Frame, connections: usize) -> String {
    format!(
        "{} message: {}, connections: {}",
        ECHO_PREFIX,
        frame.to_text(),
        connections
    )
}

/// Describes where and how to open the duplex channel for a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketDescriptor {
    pub path: String,
    pub connections: usize,
}

/// JSON body returned to callers that request a room without upgrading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeResponse {
    pub id: String,
    pub status: u16,
    #[serde(rename = "webSocket")]
    pub web_socket: SocketDescriptor,
}

impl UpgradeResponse {
    pub const SWITCHING_PROTOCOLS: u16 = 101;

    pub fn new(room: &RoomId, connections: usize) -> Self {
        Self {
            id: room.to_string(),
            status: Self::SWITCHING_PROTOCOLS,
            web_socket: SocketDescriptor {
                path: room.create_path(),
                connections,
            },
        }
    }
}
