//! # Room Relay Client Library
//!
//! A thin client for the room relay server. It does exactly what any player
//! front end does: request a connection for a room identifier and a player
//! name, then send and receive opaque frames over it.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{random_room_id, RoomClient};
//!
//! #[tokio::main]
//! async fn main() -> client::network::ClientResult<()> {
//!     let room = random_room_id();
//!     let mut player = RoomClient::connect("127.0.0.1:8080", &room, "alice").await?;
//!
//!     player.send_text("hello").await?;
//!     if let Some(reply) = player.recv().await? {
//!         // "[Durable Object] message: hello, connections: 1"
//!         println!("{}", reply.to_text());
//!     }
//!
//!     player.close(1000, "bye").await?;
//!     Ok(())
//! }
//! ```

pub mod network;
