//! # Request Handlers
//!
//! One [`Request`] variant per protocol type. Parsing a message into a
//! `Request` is the synchronous validation step; [`Request::respond`] does
//! the work and builds the reply.
//!
//! Storage failures never escape as errors: they become
//! `{success: false, error}` replies of the request's kind.

use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use super::connection::ConnectionHandle;
use super::dispatch::{Job, Services};
use super::matchmaker::{MatchCallback, MatchEvent, MatchFound, MatchOutcome};
use super::persistence::{Operation, StorageReply};
use super::storage::{AccountRecord, NewGame};
use crate::common::error::{NetError, StorageError};
use crate::common::messages::{failure, Message, ProtocolType};

/// What a handler can reach while it runs.
pub struct HandlerContext<'a> {
    pub services: &'a Services,
    pub connection: &'a ConnectionHandle,
    /// Lets callbacks queue follow-up jobs on the dispatch worker.
    pub follow_ups: &'a mpsc::WeakUnboundedSender<Job>,
}

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateAccount {
        username: String,
        password: String,
    },
    CredentialCheck {
        username: String,
        password: String,
    },
    CreateGame {
        player_one: i64,
        player_two: i64,
        ruleset: String,
        board_size: u32,
        board_state: String,
    },
    SaveGame {
        game_id: i64,
        board_state: String,
        next_turn: u8,
    },
    GetGame {
        game_id: i64,
    },
    Matchmaker {
        account_id: i64,
        ruleset: String,
        board_size: u32,
    },
    CancelMatch {
        account_id: i64,
    },
    UpdateElo {
        account_id: i64,
        elo: i64,
    },
    GetTopElos {
        limit: Option<usize>,
    },
}

impl Request {
    /// Build the request matching the message's kind.
    ///
    /// Fails with `UnknownProtocolType` for kinds clients may not send and
    /// `InvalidField` for missing or mistyped fields.
    pub fn from_message(message: &Message) -> Result<Self, NetError> {
        let kind = message.require_kind()?;
        let request = match kind.parse::<ProtocolType>()? {
            ProtocolType::CreateAccount => Request::CreateAccount {
                username: message.field("username")?,
                password: message.field("password")?,
            },
            ProtocolType::CredentialCheck => Request::CredentialCheck {
                username: message.field("username")?,
                password: message.field("password")?,
            },
            ProtocolType::CreateGame => Request::CreateGame {
                player_one: message.field("player_one")?,
                player_two: message.field("player_two")?,
                ruleset: message.field("ruleset")?,
                board_size: message.field("board_size")?,
                board_state: message.optional_field("board_state")?.unwrap_or_default(),
            },
            ProtocolType::SaveGame => Request::SaveGame {
                game_id: message.field("game_id")?,
                board_state: message.field("board_state")?,
                next_turn: message.field("next_turn")?,
            },
            ProtocolType::GetGame => Request::GetGame {
                game_id: message.field("game_id")?,
            },
            ProtocolType::Matchmaker => Request::Matchmaker {
                account_id: message.field("account_id")?,
                ruleset: message.field("ruleset")?,
                board_size: message.field("board_size")?,
            },
            ProtocolType::CancelMatch => Request::CancelMatch {
                account_id: message.field("account_id")?,
            },
            ProtocolType::UpdateElo => Request::UpdateElo {
                account_id: message.field("account_id")?,
                elo: message.field("elo")?,
            },
            ProtocolType::GetTopElos => Request::GetTopElos {
                limit: message.optional_field("limit")?,
            },
            ProtocolType::Breach => {
                return Err(NetError::UnknownProtocolType {
                    kind: kind.to_string(),
                })
            }
        };
        Ok(request)
    }

    pub fn kind(&self) -> ProtocolType {
        match self {
            Request::CreateAccount { .. } => ProtocolType::CreateAccount,
            Request::CredentialCheck { .. } => ProtocolType::CredentialCheck,
            Request::CreateGame { .. } => ProtocolType::CreateGame,
            Request::SaveGame { .. } => ProtocolType::SaveGame,
            Request::GetGame { .. } => ProtocolType::GetGame,
            Request::Matchmaker { .. } => ProtocolType::Matchmaker,
            Request::CancelMatch { .. } => ProtocolType::CancelMatch,
            Request::UpdateElo { .. } => ProtocolType::UpdateElo,
            Request::GetTopElos { .. } => ProtocolType::GetTopElos,
        }
    }

    /// Handle the request.
    ///
    /// Returns `None` when the reply is sent later; `matchmaker` replies
    /// arrive as [`Job::MatchNotice`] follow-ups.
    pub async fn respond(self, ctx: &HandlerContext<'_>) -> Option<Message> {
        let kind = self.kind();
        let persistence = &ctx.services.persistence;

        let result = match self {
            Request::CreateAccount { username, password } => {
                let reply = persistence
                    .call(Operation::CreateAccount {
                        username: username.clone(),
                        password,
                    })
                    .await;
                match reply {
                    Ok(StorageReply::AccountCreated(account_id)) => {
                        info!("👤 Created account {} ('{}')", account_id, username);
                        ctx.connection.bind_account(account_id);
                        Ok(success(kind).with("account_id", account_id))
                    }
                    other => Err(unexpected(other)),
                }
            }

            Request::CredentialCheck { username, password } => {
                let reply = persistence
                    .call(Operation::CheckCredentials { username, password })
                    .await;
                match reply {
                    Ok(StorageReply::Credentials(Some(account_id))) => {
                        ctx.connection.bind_account(account_id);
                        Ok(success(kind)
                            .with("credential_check", true)
                            .with("account_id", account_id))
                    }
                    Ok(StorageReply::Credentials(None)) => Ok(success(kind)
                        .with("credential_check", false)
                        .with("account_id", Value::Null)),
                    other => Err(unexpected(other)),
                }
            }

            Request::CreateGame {
                player_one,
                player_two,
                ruleset,
                board_size,
                board_state,
            } => {
                let reply = persistence
                    .call(Operation::CreateGame(NewGame {
                        player_one,
                        player_two,
                        ruleset,
                        board_size,
                        board_state,
                    }))
                    .await;
                match reply {
                    Ok(StorageReply::GameCreated(game_id)) => {
                        Ok(success(kind).with("game_id", game_id))
                    }
                    other => Err(unexpected(other)),
                }
            }

            Request::SaveGame {
                game_id,
                board_state,
                next_turn,
            } => {
                let reply = persistence
                    .call(Operation::SaveGame {
                        game_id,
                        board_state,
                        next_turn,
                    })
                    .await;
                match reply {
                    Ok(StorageReply::Saved) => Ok(success(kind)),
                    other => Err(unexpected(other)),
                }
            }

            Request::GetGame { game_id } => {
                match persistence.call(Operation::GetGame { game_id }).await {
                    Ok(StorageReply::Game(game)) => Ok(success(kind)
                        .with("game_id", game.game_id)
                        .with("board_state", game.board_state)
                        .with("next_turn", game.next_turn)
                        .with("player_one", game.player_one)
                        .with("player_two", game.player_two)
                        .with("ruleset", game.ruleset)
                        .with("board_size", game.board_size)),
                    other => Err(unexpected(other)),
                }
            }

            Request::Matchmaker {
                account_id,
                ruleset,
                board_size,
            } => {
                ctx.connection.bind_account(account_id);
                let callback = notify_on_match(ctx, account_id);
                let outcome = ctx
                    .services
                    .matchmaker
                    .match_user(account_id, &ruleset, board_size, callback);
                if let MatchOutcome::Matched {
                    opponent_account_id,
                } = outcome
                {
                    ctx.services.stats.match_made();
                    info!(
                        "🎲 Paired accounts {} and {} ({} {}x{})",
                        account_id, opponent_account_id, ruleset, board_size, board_size
                    );

                    // Both match notices were queued behind this job, so the
                    // game is published before either of them runs.
                    let game = persistence
                        .call(Operation::CreateGame(NewGame {
                            player_one: account_id,
                            player_two: opponent_account_id,
                            ruleset,
                            board_size,
                            board_state: String::new(),
                        }))
                        .await;
                    let game = match game {
                        Ok(StorageReply::GameCreated(game_id)) => Ok(game_id),
                        other => {
                            let e = unexpected(other);
                            warn!(
                                "⚠️  No game for accounts {} and {}: {}",
                                account_id, opponent_account_id, e
                            );
                            Err(e)
                        }
                    };
                    ctx.services
                        .matched_games
                        .publish(account_id, opponent_account_id, game);
                }
                return None;
            }

            Request::CancelMatch { account_id } => {
                let removed = ctx.services.matchmaker.remove_user(account_id);
                debug!(
                    "🚪 Account {} cancelled matchmaking ({} entries)",
                    account_id, removed
                );
                Ok(success(kind))
            }

            Request::UpdateElo { account_id, elo } => {
                match persistence
                    .call(Operation::UpdateElo { account_id, elo })
                    .await
                {
                    Ok(StorageReply::Saved) => Ok(success(kind)),
                    other => Err(unexpected(other)),
                }
            }

            Request::GetTopElos { limit } => {
                let limit = limit.unwrap_or(ctx.services.top_elos_limit);
                match persistence.call(Operation::TopElos { limit }).await {
                    Ok(StorageReply::TopElos(records)) => {
                        Ok(success(kind).with("top_elos", elo_table(&records)))
                    }
                    other => Err(unexpected(other)),
                }
            }
        };

        Some(result.unwrap_or_else(|e| failure(kind.as_str(), e)))
    }
}

/// Games allocated for fresh pairings, waiting to be announced to each seat.
///
/// Keyed by `(recipient, opponent)`. Each key holds a queue so a pair that
/// matches again before its notices ran still gets its games in order.
#[derive(Default)]
pub struct MatchedGames {
    seats: Mutex<HashMap<(i64, i64), VecDeque<Result<i64, StorageError>>>>,
}

impl MatchedGames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of creating the game for one pairing, for both seats.
    pub fn publish(&self, player_one: i64, player_two: i64, game: Result<i64, StorageError>) {
        let mut seats = self.seats.lock().unwrap_or_else(PoisonError::into_inner);
        for key in [(player_one, player_two), (player_two, player_one)] {
            seats.entry(key).or_default().push_back(game.clone());
        }
    }

    /// Take the oldest game announced to `account_id` against `opponent`.
    pub fn claim(&self, account_id: i64, opponent: i64) -> Option<Result<i64, StorageError>> {
        let mut seats = self.seats.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = seats.get_mut(&(account_id, opponent))?;
        let game = queue.pop_front();
        if queue.is_empty() {
            seats.remove(&(account_id, opponent));
        }
        game
    }
}

/// Reply to a `matchmaker` request once the matchmaker has resolved it.
///
/// The game was allocated once by the request that completed the match;
/// both seats receive that game id, or both receive its failure.
pub async fn match_notice(services: &Services, account_id: i64, event: MatchEvent) -> Message {
    let kind = ProtocolType::Matchmaker;
    match event {
        MatchEvent::Cancelled => failure(kind.as_str(), "matchmaking cancelled"),
        MatchEvent::Matched(found) => complete_match(services, account_id, found)
            .await
            .unwrap_or_else(|e| failure(kind.as_str(), e)),
    }
}

async fn complete_match(
    services: &Services,
    account_id: i64,
    found: MatchFound,
) -> Result<Message, StorageError> {
    let game_id = services
        .matched_games
        .claim(account_id, found.opponent_account_id)
        .unwrap_or_else(|| {
            Err(StorageError::Unavailable {
                reason: "no game was allocated for this match".to_string(),
            })
        })?;

    let opponent = match services
        .persistence
        .call(Operation::GetAccount {
            account_id: found.opponent_account_id,
        })
        .await
    {
        Ok(StorageReply::Account(account)) => account,
        other => return Err(unexpected(other)),
    };

    Ok(success(ProtocolType::Matchmaker)
        .with("game_id", game_id)
        .with("opp_username", opponent.username)
        .with("opp_elo", opponent.elo)
        .with("player_term", found.player_term))
}

/// Callback that turns a matchmaker event into a follow-up dispatch job.
fn notify_on_match(ctx: &HandlerContext<'_>, account_id: i64) -> MatchCallback {
    let connection = ctx.connection.clone();
    let follow_ups = ctx.follow_ups.clone();

    Box::new(move |event| {
        let Some(jobs) = follow_ups.upgrade() else {
            debug!("📭 Dispatcher gone, dropping match notice for {}", account_id);
            return;
        };
        let job = Job::MatchNotice {
            connection,
            account_id,
            event,
        };
        if jobs.send(job).is_err() {
            debug!("📭 Dispatcher stopped, dropping match notice for {}", account_id);
        }
    })
}

fn success(kind: ProtocolType) -> Message {
    Message::new(kind).with("success", true)
}

/// Map a storage error, or a reply of the wrong shape, to a `StorageError`.
fn unexpected(reply: Result<StorageReply, StorageError>) -> StorageError {
    match reply {
        Err(e) => e,
        Ok(other) => StorageError::Unavailable {
            reason: format!("unexpected storage reply {:?}", other),
        },
    }
}

fn elo_table(records: &[AccountRecord]) -> Value {
    Value::Array(
        records
            .iter()
            .map(|record| {
                json!({
                    "account_id": record.account_id,
                    "username": record.username,
                    "elo": record.elo,
                })
            })
            .collect(),
    )
}
