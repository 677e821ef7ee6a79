use clap::Parser;
use client::network::{random_room_id, ClientResult, RoomClient};
use log::info;
use shared::{close_code, Frame};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Room to join; a new room is created when omitted
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// Player name shown to the room
    #[arg(short = 'n', long, default_value = "player")]
    name: String,
}

#[tokio::main]
async fn main() -> ClientResult<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let room = args.room.unwrap_or_else(random_room_id);

    info!("Joining room {} as {}", room, args.name);
    let mut client = RoomClient::connect(&args.server, &room, &args.name).await?;
    println!("Joined room {} (type /quit to leave)", client.room());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) => client.send(Frame::Text(line)).await?,
                None => break,
            },

            frame = client.recv() => match frame? {
                Some(frame) => println!("{}", frame.to_text()),
                None => {
                    println!("Connection closed by server");
                    return Ok(());
                }
            },
        }
    }

    client.close(close_code::NORMAL, "bye").await?;
    info!("Left room {}", room);

    Ok(())
}
