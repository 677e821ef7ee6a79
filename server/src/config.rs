//! Per-room behaviour shared by every coordinator of a server

use clap::ValueEnum;
use std::time::Duration;

/// What a room does with a frame it receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DispatchMode {
    /// Reply to the sender only
    #[default]
    Echo,
    /// Reply to the sender and forward the frame to every other player
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Maximum players per room, unbounded when None
    pub max_players: Option<usize>,
    /// Reject joins whose name is already on the roster
    pub unique_names: bool,
    pub dispatch: DispatchMode,
    /// Evict an active room from memory after this long without events
    pub idle_eviction: Option<Duration>,
    /// Frames queued for one player before it counts as unreachable
    pub outbound_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: None,
            unique_names: false,
            dispatch: DispatchMode::Echo,
            idle_eviction: Some(Duration::from_secs(30)),
            outbound_buffer: 256,
        }
    }
}
