use clap::Parser;
use log::{error, info};
use server::config::{parse_overrides, ServerConfig, KEY_IP, KEY_PORT, KEY_TICK_RATE};
use server::{MemoryRecordStore, Server};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
    /// Server variable override, e.g. -D maxPlayers=32
    #[clap(short = 'D', long = "define", value_name = "KEY=VALUE")]
    defines: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let mut vars = parse_overrides(&args.defines)?;
    if let Some(host) = args.host {
        vars.insert(KEY_IP.to_string(), host);
    }
    if let Some(port) = args.port {
        vars.insert(KEY_PORT.to_string(), port.to_string());
    }
    if let Some(tick_rate) = args.tick_rate {
        vars.insert(KEY_TICK_RATE.to_string(), tick_rate.to_string());
    }
    let config = ServerConfig::from_vars(&vars)?;

    let store_settings = &config.record_store;
    info!(
        "Record store {}:{} as '{}' (password: {} characters)",
        store_settings.ip,
        store_settings.port,
        store_settings.user,
        store_settings.password.len()
    );
    info!(
        "Starting server v{} with {} player slots at {}Hz ({} data)",
        config.version,
        config.player_limit(),
        config.tick_rate,
        if config.server_player_data {
            "server"
        } else {
            "client"
        }
    );

    let server = match Server::start(config, Arc::new(MemoryRecordStore::new())).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.shutdown();

    Ok(())
}
