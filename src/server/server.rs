//! # Game Server
//!
//! Wires the server components together:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ServerConnectionManager (accept, read, write)│
//! │        │                                     │
//! │        ▼                                     │
//! │ Dispatcher (one serial worker)               │
//! │   ├── Matchmaker (waiting list)              │
//! │   └── PersistenceQueue ──▶ Storage thread    │
//! └──────────────────────────────────────────────┘
//! ```

use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::config::ServerConfig;
use super::dispatch::{Dispatcher, Services};
use super::handlers::MatchedGames;
use super::manager::ServerConnectionManager;
use super::matchmaker::Matchmaker;
use super::metrics::ServerStats;
use super::persistence::PersistenceQueue;
use super::storage::Storage;
use crate::common::error::NetError;

pub struct GameServer {
    config: ServerConfig,
    services: Arc<Services>,
    manager: Arc<ServerConnectionManager>,
}

impl GameServer {
    /// Start the persistence and dispatch workers around `storage`.
    ///
    /// Must be called inside a tokio runtime. Nothing listens until
    /// [`run`](Self::run) or [`serve`](Self::serve).
    pub fn start<S>(config: ServerConfig, storage: S) -> Result<Self, NetError>
    where
        S: Storage + Send + 'static,
    {
        let stats = ServerStats::new();
        let services = Arc::new(Services {
            persistence: PersistenceQueue::start(storage)?,
            matchmaker: Matchmaker::new(),
            matched_games: MatchedGames::new(),
            stats: stats.clone(),
            top_elos_limit: config.matchmaking.top_elos_limit,
        });

        let dispatcher = Dispatcher::start(services.clone());
        let manager = Arc::new(ServerConnectionManager::new(
            config.server.address.clone(),
            dispatcher,
            stats,
        ));

        info!("🚀 Game server ready for {}", config.server.address);
        Ok(Self {
            config,
            services,
            manager,
        })
    }

    /// Listen on the configured address until the process ends.
    pub async fn run(&self) -> Result<(), NetError> {
        self.manager.clone().listen().await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), NetError> {
        self.manager.clone().serve(listener).await
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.services.stats
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.services.matchmaker
    }

    pub fn connections(&self) -> &Arc<ServerConnectionManager> {
        &self.manager
    }
}
