//! # Room Relay Server Library
//!
//! This library provides the server side of the room relay: players open a
//! WebSocket to a room, are registered in that room's roster, and exchange
//! frames through a single coordinator per room.
//!
//! ## Core Responsibilities
//!
//! ### Connection Routing
//! The gateway validates the room identifier of every incoming request,
//! resolves it to the one logical room with that name (creating it on first
//! use) and upgrades the request into a duplex connection owned by the room.
//!
//! ### Roster Management
//! Each room keeps the players currently connected to it in join order:
//! - Registration on successful upgrade
//! - Removal exactly once, when the channel closes or fails
//! - Optional capacity and unique-name limits
//!
//! ### Frame Dispatch
//! Frames are answered with an echo carrying the current roster size. In
//! relay mode they are additionally forwarded to every other player. A player
//! that can no longer be reached is treated as disconnected and never affects
//! delivery to the others.
//!
//! ## Architecture Design
//!
//! ### One Task Per Room
//! All events of a room (joins, frames, closes, broadcasts) are queued and
//! handled sequentially by that room's coordinator task. Rooms never share
//! mutable state, so different rooms run fully in parallel and no room needs
//! locks around its roster.
//!
//! ### Hibernation
//! A coordinator may leave memory when its room is idle. Open connections and
//! the event queue stay behind in the room slot, and the roster is saved as a
//! snapshot. The next event starts a new coordinator that restores the
//! roster; frames that arrived in between are handled in arrival order.
//!
//! ## Module Organization
//!
//! - `config`: per-room limits, dispatch mode and eviction window
//! - `endpoint`: the two halves of a player connection
//! - `roster`: ordered player entries of one room
//! - `storage`: roster snapshots and the store they are kept in
//! - `room`: room address, event queue and residency
//! - `coordinator`: the per-room task and its event handlers
//! - `gateway`: identifier validation and room lookup
//! - `network`: HTTP routes, WebSocket upgrade and frame pumping
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RoomConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Bind the gateway; rooms are created as players connect to
//!     // ws://127.0.0.1:8080/paranoia/create/<room-id>?name=<player>
//!     let server = Server::new("127.0.0.1:8080", RoomConfig::default()).await?;
//!
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
mod coordinator;
pub mod endpoint;
pub mod gateway;
pub mod network;
pub mod room;
pub mod roster;
pub mod storage;
