//! # Storage Backend Interface
//!
//! The game server never talks to a database directly: every read and write
//! goes through the [`PersistenceQueue`](super::persistence::PersistenceQueue),
//! whose single worker thread owns one [`Storage`] implementation.
//!
//! [`MemoryStorage`] keeps everything in process memory. It backs the test
//! suite and lets the server run without an external database.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::error::StorageError;

/// A registered player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: i64,
    pub username: String,
    pub elo: i64,
}

/// Parameters for a new game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGame {
    pub player_one: i64,
    pub player_two: i64,
    pub ruleset: String,
    pub board_size: u32,
    pub board_state: String,
}

/// A persisted game. `board_state` is opaque to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: i64,
    pub player_one: i64,
    pub player_two: i64,
    pub ruleset: String,
    pub board_size: u32,
    pub board_state: String,
    /// Player term (1 or 2) whose move is next.
    pub next_turn: u8,
}

/// Narrow interface to the storage engine.
///
/// Methods take `&mut self`: the persistence worker is the only caller, so
/// implementations need no internal locking.
pub trait Storage {
    /// Register a new account and return its id.
    fn create_account(&mut self, username: &str, password: &str) -> Result<i64, StorageError>;

    /// Return the account id when the credentials match.
    fn check_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Option<i64>, StorageError>;

    fn account(&mut self, account_id: i64) -> Result<AccountRecord, StorageError>;

    fn create_game(&mut self, game: NewGame) -> Result<i64, StorageError>;

    fn save_game(
        &mut self,
        game_id: i64,
        board_state: &str,
        next_turn: u8,
    ) -> Result<(), StorageError>;

    fn game(&mut self, game_id: i64) -> Result<GameRecord, StorageError>;

    fn update_elo(&mut self, account_id: i64, elo: i64) -> Result<(), StorageError>;

    /// Accounts ordered by ELO, highest first.
    fn top_elos(&mut self, limit: usize) -> Result<Vec<AccountRecord>, StorageError>;
}

#[derive(Debug, Clone)]
struct StoredAccount {
    record: AccountRecord,
    password: String,
}

/// In-memory [`Storage`].
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    initial_elo: i64,
    accounts: HashMap<i64, StoredAccount>,
    games: HashMap<i64, GameRecord>,
    next_account_id: i64,
    next_game_id: i64,
}

impl MemoryStorage {
    pub fn new(initial_elo: i64) -> Self {
        Self {
            initial_elo,
            accounts: HashMap::new(),
            games: HashMap::new(),
            next_account_id: 1,
            next_game_id: 1,
        }
    }

    /// Seed an account with a fixed id (used to preload fixtures).
    pub fn with_account(mut self, record: AccountRecord, password: &str) -> Self {
        self.next_account_id = self.next_account_id.max(record.account_id + 1);
        self.accounts.insert(
            record.account_id,
            StoredAccount {
                record,
                password: password.to_string(),
            },
        );
        self
    }

    fn find_by_username(&self, username: &str) -> Option<&StoredAccount> {
        self.accounts
            .values()
            .find(|account| account.record.username == username)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(1200)
    }
}

impl Storage for MemoryStorage {
    fn create_account(&mut self, username: &str, password: &str) -> Result<i64, StorageError> {
        if self.find_by_username(username).is_some() {
            return Err(StorageError::Conflict {
                what: format!("username '{}'", username),
            });
        }

        let account_id = self.next_account_id;
        self.next_account_id += 1;
        self.accounts.insert(
            account_id,
            StoredAccount {
                record: AccountRecord {
                    account_id,
                    username: username.to_string(),
                    elo: self.initial_elo,
                },
                password: password.to_string(),
            },
        );
        Ok(account_id)
    }

    fn check_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Option<i64>, StorageError> {
        Ok(self
            .find_by_username(username)
            .filter(|account| account.password == password)
            .map(|account| account.record.account_id))
    }

    fn account(&mut self, account_id: i64) -> Result<AccountRecord, StorageError> {
        self.accounts
            .get(&account_id)
            .map(|account| account.record.clone())
            .ok_or_else(|| StorageError::NotFound {
                what: format!("account {}", account_id),
            })
    }

    fn create_game(&mut self, game: NewGame) -> Result<i64, StorageError> {
        let game_id = self.next_game_id;
        self.next_game_id += 1;
        self.games.insert(
            game_id,
            GameRecord {
                game_id,
                player_one: game.player_one,
                player_two: game.player_two,
                ruleset: game.ruleset,
                board_size: game.board_size,
                board_state: game.board_state,
                next_turn: 1,
            },
        );
        Ok(game_id)
    }

    fn save_game(
        &mut self,
        game_id: i64,
        board_state: &str,
        next_turn: u8,
    ) -> Result<(), StorageError> {
        let game = self
            .games
            .get_mut(&game_id)
            .ok_or_else(|| StorageError::NotFound {
                what: format!("game {}", game_id),
            })?;
        game.board_state = board_state.to_string();
        game.next_turn = next_turn;
        Ok(())
    }

    fn game(&mut self, game_id: i64) -> Result<GameRecord, StorageError> {
        self.games
            .get(&game_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                what: format!("game {}", game_id),
            })
    }

    fn update_elo(&mut self, account_id: i64, elo: i64) -> Result<(), StorageError> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StorageError::NotFound {
                what: format!("account {}", account_id),
            })?;
        account.record.elo = elo;
        Ok(())
    }

    fn top_elos(&mut self, limit: usize) -> Result<Vec<AccountRecord>, StorageError> {
        let mut records: Vec<AccountRecord> = self
            .accounts
            .values()
            .map(|account| account.record.clone())
            .collect();
        records.sort_by(|a, b| b.elo.cmp(&a.elo).then(a.account_id.cmp(&b.account_id)));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(player_one: i64, player_two: i64) -> NewGame {
        NewGame {
            player_one,
            player_two,
            ruleset: "standard".to_string(),
            board_size: 8,
            board_state: String::new(),
        }
    }

    #[test]
    fn accounts_get_sequential_ids_and_unique_names() {
        let mut storage = MemoryStorage::new(1000);
        assert_eq!(storage.create_account("alice", "a").unwrap(), 1);
        assert_eq!(storage.create_account("bob", "b").unwrap(), 2);
        assert!(matches!(
            storage.create_account("alice", "other"),
            Err(StorageError::Conflict { .. })
        ));
        assert_eq!(storage.account(2).unwrap().elo, 1000);
    }

    #[test]
    fn credentials_must_match() {
        let mut storage = MemoryStorage::default();
        let id = storage.create_account("alice", "secret").unwrap();
        assert_eq!(storage.check_credentials("alice", "secret").unwrap(), Some(id));
        assert_eq!(storage.check_credentials("alice", "wrong").unwrap(), None);
        assert_eq!(storage.check_credentials("nobody", "secret").unwrap(), None);
    }

    #[test]
    fn seeded_accounts_push_the_id_counter() {
        let mut storage = MemoryStorage::default().with_account(
            AccountRecord {
                account_id: 10,
                username: "ten".to_string(),
                elo: 1500,
            },
            "pw",
        );
        assert_eq!(storage.create_account("next", "pw").unwrap(), 11);
    }

    #[test]
    fn games_are_saved_and_found_by_id() {
        let mut storage = MemoryStorage::default();
        let first = storage.create_game(game(1, 2)).unwrap();
        let second = storage.create_game(game(1, 2)).unwrap();
        assert_eq!(second, first + 1);

        storage.save_game(first, "abc", 2).unwrap();
        let saved = storage.game(first).unwrap();
        assert_eq!(saved.board_state, "abc");
        assert_eq!(saved.next_turn, 2);

        assert_eq!(storage.game(second).unwrap().board_state, "");
        assert!(storage.save_game(99, "", 1).is_err());
    }

    #[test]
    fn top_elos_are_sorted_and_limited() {
        let mut storage = MemoryStorage::default();
        let a = storage.create_account("a", "").unwrap();
        let b = storage.create_account("b", "").unwrap();
        let c = storage.create_account("c", "").unwrap();
        storage.update_elo(b, 1500).unwrap();
        storage.update_elo(c, 900).unwrap();

        let top = storage.top_elos(2).unwrap();
        let ids: Vec<i64> = top.iter().map(|r| r.account_id).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
