use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{Frame, RoomId, CREATE_ROUTE};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A player's connection to one room
#[derive(Debug)]
pub struct RoomClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    room: RoomId,
    name: String,
}

impl RoomClient {
    /// Builds the WebSocket URL that joins `room` as `name` on `server` (host:port)
    pub fn connect_url(server: &str, room: &RoomId, name: &str) -> ClientResult<Url> {
        let mut url = Url::parse(&format!("ws://{}{}", server, room.create_path()))?;
        url.query_pairs_mut().append_pair("name", name);
        Ok(url)
    }

    pub async fn connect(server: &str, room: &str, name: &str) -> ClientResult<Self> {
        let room = RoomId::parse(room)?;
        let url = Self::connect_url(server, &room, name)?;

        info!("Connecting to {}", url);
        let (socket, response) = connect_async(url.as_str()).await?;
        debug!("Upgrade answered with {}", response.status());

        Ok(RoomClient {
            socket,
            room,
            name: name.to_string(),
        })
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&mut self, frame: Frame) -> ClientResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        };

        self.socket.send(message).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> ClientResult<()> {
        self.send(Frame::text(text)).await
    }

    /// Next frame from the room, or None once the connection closed
    pub async fn recv(&mut self) -> ClientResult<Option<Frame>> {
        while let Some(message) = self.socket.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(Frame::Text(text))),
                Message::Binary(data) => return Ok(Some(Frame::Binary(data))),
                Message::Close(frame) => {
                    debug!("Room {} closed the connection: {:?}", self.room, frame);
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        Ok(None)
    }

    /// Closes the connection and waits for the acknowledgment
    ///
    /// Returns the code and reason of the closing handshake, if one arrived.
    pub async fn close(&mut self, code: u16, reason: &str) -> ClientResult<Option<(u16, String)>> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.socket.close(Some(frame)).await?;

        while let Some(message) = self.socket.next().await {
            match message {
                Ok(Message::Close(frame)) => {
                    return Ok(frame.map(|f| (u16::from(f.code), f.reason.into_owned())));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Connection ended during close: {}", e);
                    break;
                }
            }
        }

        Ok(None)
    }
}

/// Fresh UUID-shaped room identifier
pub fn random_room_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[test]
    fn test_random_room_id_is_valid() {
        for _ in 0..100 {
            let id = random_room_id();
            assert_eq!(id.len(), 36);
            assert!(RoomId::parse(&id).is_ok(), "generated invalid id {}", id);
        }
    }

    #[test]
    fn test_random_room_ids_differ() {
        assert_ne!(random_room_id(), random_room_id());
    }

    #[test]
    fn test_connect_url_encodes_name() {
        let room = RoomId::parse("1a2b3c").unwrap();
        let url = RoomClient::connect_url("127.0.0.1:8080", &room, "Ann & Bo").unwrap();

        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), format!("{}/1a2b3c", CREATE_ROUTE));
        assert_eq!(url.query(), Some("name=Ann+%26+Bo"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_room_locally() {
        assert_err!(RoomClient::connect("127.0.0.1:1", "not-valid!", "ann").await);
    }
}
