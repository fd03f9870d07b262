//! # Server Binary Entry Point
//!
//! Thin wrapper that loads the configuration and runs the game server with
//! in-memory storage.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/server.toml
//! ```

use clap::Parser;
use log::{info, LevelFilter};

use tabletop_net::common::config::load_config;
use tabletop_net::common::logging::init_logger;
use tabletop_net::server::{GameServer, MemoryStorage, ServerConfig};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML format)
    ///
    /// Example: config/server.toml
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LevelFilter::Info);

    let args = Args::parse();
    let config: ServerConfig = load_config(&args.config)?;
    info!(
        "🚀 Starting game server on {} (initial ELO {})",
        config.server.address, config.storage.initial_elo
    );

    let storage = MemoryStorage::new(config.storage.initial_elo);
    let server = GameServer::start(config, storage)?;

    // Runs until the listener fails to bind.
    server.run().await?;

    Ok(())
}
