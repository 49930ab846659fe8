use clap::Parser;
use client::bot::Bot;
use client::network::{Client, Handshake};
use log::info;
use shared::PlayerData;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:6143")]
    server: String,

    /// Player name
    #[arg(short = 'n', long, default_value = "Bot")]
    name: String,

    /// Version sent in the handshake
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    protocol_version: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Seed for the bot's wandering
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Stop after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting bot '{}'...", args.name);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = Client::connect(&args.server)
        .await?
        .with_fake_ping(args.fake_ping);
    let data = match client
        .handshake(&args.protocol_version, &args.name, Duration::from_secs(10))
        .await?
    {
        Handshake::ServerData(data) => data,
        Handshake::ClientData { id } => PlayerData::new(id, &args.name),
    };
    client.join(data.clone()).await?;

    let mut bot = Bot::new(client, data, args.seed);
    bot.run(args.duration.map(Duration::from_secs)).await?;

    Ok(())
}
