//! # Client Binary Entry Point
//!
//! Command-line front end for the game client: one request per invocation.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml create-account alice hunter2
//! cargo run --bin client -- --config config/client.toml find-match 1 --ruleset standard --board-size 8
//! cargo run --bin client -- --config config/client.toml top-elos --limit 5
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::sync::Arc;

use tabletop_net::client::{ClientConfig, ClientConnectionManager, GameClient};
use tabletop_net::common::config::load_config;
use tabletop_net::common::logging::init_logger;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new account
    CreateAccount { username: String, password: String },
    /// Check credentials and print the account id
    Login { username: String, password: String },
    /// Wait for an opponent with the same ruleset and board size
    FindMatch {
        account_id: i64,
        #[arg(long, default_value = "standard")]
        ruleset: String,
        #[arg(long, default_value_t = 8)]
        board_size: u32,
    },
    /// Leave the matchmaking queue
    CancelMatch { account_id: i64 },
    /// Print a stored game
    GetGame { game_id: i64 },
    /// Print the ranking
    TopElos {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LevelFilter::Info);

    let args = Args::parse();
    let mut config: ClientConfig = load_config(&args.config)?;
    // A one-shot command has nothing to resume after a reconnect.
    config.client.auto_reconnect = false;

    let connection = Arc::new(ClientConnectionManager::new(config));
    connection
        .connect()
        .await
        .with_context(|| format!("Could not reach {}", connection.server_address()))?;
    let client = GameClient::new(connection.clone());

    match args.command {
        Command::CreateAccount { username, password } => {
            let account_id = client.create_account(&username, &password).await?;
            info!("✅ Created account '{}' with id {}", username, account_id);
        }
        Command::Login { username, password } => {
            match client.check_credentials(&username, &password).await? {
                Some(account_id) => info!("✅ Logged in as '{}' (id {})", username, account_id),
                None => info!("❌ Invalid credentials for '{}'", username),
            }
        }
        Command::FindMatch {
            account_id,
            ruleset,
            board_size,
        } => {
            info!("⏳ Waiting for an opponent ({} {}x{})...", ruleset, board_size, board_size);
            let found = client.find_match(account_id, &ruleset, board_size).await?;
            info!(
                "🎮 Game {} against {} (ELO {}), you are player {}",
                found.game_id, found.opp_username, found.opp_elo, found.player_term
            );
        }
        Command::CancelMatch { account_id } => {
            client.cancel_match(account_id).await?;
            info!("✅ Left matchmaking");
        }
        Command::GetGame { game_id } => {
            let game = client.get_game(game_id).await?;
            println!("{}", serde_json::to_string_pretty(&game)?);
        }
        Command::TopElos { limit } => {
            for (rank, entry) in client.top_elos(limit).await?.iter().enumerate() {
                println!("{:>3}. {:<20} {}", rank + 1, entry.username, entry.elo);
            }
        }
    }

    connection.disconnect().await;
    Ok(())
}
