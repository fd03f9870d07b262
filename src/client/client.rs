//! # Game Client
//!
//! Typed requests on top of [`ClientConnectionManager`]. Each method builds
//! the wire message, waits for the correlated response and turns a
//! `success: false` reply into [`NetError::Rejected`].
//!
//! ```rust,ignore
//! let connection = Arc::new(ClientConnectionManager::new(config));
//! connection.connect().await?;
//!
//! let client = GameClient::new(connection);
//! let me = client.create_account("alice", "hunter2").await?;
//! let game = client.find_match(me, "standard", 8).await?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::manager::ClientConnectionManager;
use crate::common::error::NetError;
use crate::common::messages::{Message, ProtocolType};

/// A game assigned by the matchmaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub game_id: i64,
    pub opp_username: String,
    pub opp_elo: i64,
    /// 1 moves first.
    pub player_term: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game_id: i64,
    pub player_one: i64,
    pub player_two: i64,
    pub ruleset: String,
    pub board_size: u32,
    pub board_state: String,
    pub next_turn: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EloEntry {
    pub account_id: i64,
    pub username: String,
    pub elo: i64,
}

#[derive(Clone)]
pub struct GameClient {
    connection: Arc<ClientConnectionManager>,
}

impl GameClient {
    pub fn new(connection: Arc<ClientConnectionManager>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<ClientConnectionManager> {
        &self.connection
    }

    /// Register a new account and return its id.
    pub async fn create_account(&self, username: &str, password: &str) -> Result<i64, NetError> {
        let request = Message::new(ProtocolType::CreateAccount)
            .with("username", username)
            .with("password", password);
        self.call(request, true).await?.field("account_id")
    }

    /// The account id for valid credentials, `None` otherwise.
    pub async fn check_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<i64>, NetError> {
        let request = Message::new(ProtocolType::CredentialCheck)
            .with("username", username)
            .with("password", password);
        let response = self.call(request, true).await?;
        if response.field::<bool>("credential_check")? {
            response.field("account_id").map(Some)
        } else {
            Ok(None)
        }
    }

    pub async fn create_game(
        &self,
        player_one: i64,
        player_two: i64,
        ruleset: &str,
        board_size: u32,
    ) -> Result<i64, NetError> {
        let request = Message::new(ProtocolType::CreateGame)
            .with("player_one", player_one)
            .with("player_two", player_two)
            .with("ruleset", ruleset)
            .with("board_size", board_size);
        self.call(request, true).await?.field("game_id")
    }

    pub async fn save_game(
        &self,
        game_id: i64,
        board_state: &str,
        next_turn: u8,
    ) -> Result<(), NetError> {
        let request = Message::new(ProtocolType::SaveGame)
            .with("game_id", game_id)
            .with("board_state", board_state)
            .with("next_turn", next_turn);
        self.call(request, true).await.map(|_| ())
    }

    pub async fn get_game(&self, game_id: i64) -> Result<GameSnapshot, NetError> {
        let request = Message::new(ProtocolType::GetGame).with("game_id", game_id);
        let response = self.call(request, true).await?;
        Ok(GameSnapshot {
            game_id: response.field("game_id")?,
            player_one: response.field("player_one")?,
            player_two: response.field("player_two")?,
            ruleset: response.field("ruleset")?,
            board_size: response.field("board_size")?,
            board_state: response.field("board_state")?,
            next_turn: response.field("next_turn")?,
        })
    }

    /// Join matchmaking and wait, without a timeout, for an opponent.
    ///
    /// Fails with `Rejected` if the wait is cancelled by [`cancel_match`](Self::cancel_match).
    pub async fn find_match(
        &self,
        account_id: i64,
        ruleset: &str,
        board_size: u32,
    ) -> Result<MatchResult, NetError> {
        let request = Message::new(ProtocolType::Matchmaker)
            .with("account_id", account_id)
            .with("ruleset", ruleset)
            .with("board_size", board_size);
        let response = self.call(request, false).await?;
        Ok(MatchResult {
            game_id: response.field("game_id")?,
            opp_username: response.field("opp_username")?,
            opp_elo: response.field("opp_elo")?,
            player_term: response.field("player_term")?,
        })
    }

    pub async fn cancel_match(&self, account_id: i64) -> Result<(), NetError> {
        let request = Message::new(ProtocolType::CancelMatch).with("account_id", account_id);
        self.call(request, true).await.map(|_| ())
    }

    pub async fn update_elo(&self, account_id: i64, elo: i64) -> Result<(), NetError> {
        let request = Message::new(ProtocolType::UpdateElo)
            .with("account_id", account_id)
            .with("elo", elo);
        self.call(request, true).await.map(|_| ())
    }

    /// Highest-rated accounts, best first. `None` uses the server's default limit.
    pub async fn top_elos(&self, limit: Option<usize>) -> Result<Vec<EloEntry>, NetError> {
        let mut request = Message::new(ProtocolType::GetTopElos);
        if let Some(limit) = limit {
            request.set("limit", limit);
        }
        self.call(request, true).await?.field("top_elos")
    }

    async fn call(&self, request: Message, bounded: bool) -> Result<Message, NetError> {
        let kind = request.require_kind()?.to_string();
        let response = if bounded {
            self.connection.request(request, &kind).await?
        } else {
            self.connection
                .request_with_timeout(request, &kind, None)
                .await?
        };

        if response.success() {
            Ok(response)
        } else {
            let reason = response
                .optional_field::<String>("error")?
                .unwrap_or_else(|| format!("{} failed", kind));
            Err(NetError::Rejected { reason })
        }
    }
}
