use clap::Parser;
use log::info;
use server::config::{DispatchMode, RoomConfig};
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, env = "RELAY_PORT", default_value = "8080")]
    port: u16,

    /// Maximum players per room (unlimited when omitted)
    #[arg(short, long, env = "RELAY_MAX_PLAYERS")]
    max_players: Option<usize>,

    /// Reject players whose name is already taken in the room
    #[arg(short, long, env = "RELAY_UNIQUE_NAMES")]
    unique_names: bool,

    /// What a room does with incoming frames
    #[arg(short, long, env = "RELAY_DISPATCH", value_enum, default_value_t = DispatchMode::Echo)]
    dispatch: DispatchMode,

    /// Seconds of inactivity before a room leaves memory (0 keeps rooms resident)
    #[arg(short, long, env = "RELAY_IDLE_EVICTION", default_value = "30")]
    idle_eviction: u64,

    /// Frames queued per player before a slow reader is disconnected
    #[arg(short = 'b', long, env = "RELAY_OUTBOUND_BUFFER", default_value = "256")]
    outbound_buffer: usize,
}

impl Args {
    fn room_config(&self) -> RoomConfig {
        RoomConfig {
            max_players: self.max_players,
            unique_names: self.unique_names,
            dispatch: self.dispatch,
            idle_eviction: (self.idle_eviction > 0).then(|| Duration::from_secs(self.idle_eviction)),
            outbound_buffer: self.outbound_buffer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = args.room_config();
    info!("Room config: {:?}", config);

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
