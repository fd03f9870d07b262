//! # Matchmaker
//!
//! In-memory pairing engine. Players ask for an opponent with a ruleset and a
//! board size; the first compatible waiting player (in arrival order) is
//! paired with them, otherwise they join the waiting list.
//!
//! The matchmaker only decides *who* plays *whom* and which seat each player
//! takes. Creating and persisting the game is left to the caller's callbacks.

use log::debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The pairing delivered to a player's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFound {
    pub opponent_account_id: i64,
    /// 1 for the player who completed the match, 2 for the one who was waiting.
    pub player_term: u8,
    pub ruleset: String,
    pub board_size: u32,
}

/// What eventually happens to a matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Matched(MatchFound),
    /// The waiting entry was removed before anyone matched it.
    Cancelled,
}

/// Invoked exactly once per `match_user` call.
pub type MatchCallback = Box<dyn FnOnce(MatchEvent) + Send>;

/// Immediate result of [`Matchmaker::match_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { opponent_account_id: i64 },
    /// No compatible opponent yet; the caller is now waiting.
    Waiting,
}

struct MatchmakingEntry {
    account_id: i64,
    ruleset: String,
    board_size: u32,
    callback: MatchCallback,
}

/// Waiting list guarded by a single lock.
#[derive(Default)]
pub struct Matchmaker {
    waiting: Mutex<Vec<MatchmakingEntry>>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiting(&self) -> MutexGuard<'_, Vec<MatchmakingEntry>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pair `account_id` with the first compatible waiting player, or wait.
    ///
    /// On a match the caller's `callback` receives `player_term = 1` and the
    /// waiting player's callback `player_term = 2`. A previous waiting entry
    /// for the same account is cancelled first.
    ///
    /// Callbacks run after the lock is released.
    pub fn match_user(
        &self,
        account_id: i64,
        ruleset: &str,
        board_size: u32,
        callback: MatchCallback,
    ) -> MatchOutcome {
        let mut waiting = self.waiting();
        let stale = take_entries_of(&mut waiting, account_id);

        let position = waiting
            .iter()
            .position(|entry| entry.ruleset == ruleset && entry.board_size == board_size);

        let Some(index) = position else {
            waiting.push(MatchmakingEntry {
                account_id,
                ruleset: ruleset.to_string(),
                board_size,
                callback,
            });
            debug!(
                "⏳ Account {} waiting for a {} {}x{} opponent ({} waiting)",
                account_id,
                ruleset,
                board_size,
                board_size,
                waiting.len()
            );
            drop(waiting);
            cancel_all(stale);
            return MatchOutcome::Waiting;
        };

        let opponent = waiting.remove(index);
        drop(waiting);
        cancel_all(stale);

        debug!(
            "🤝 Matched account {} with waiting account {} ({} {}x{})",
            account_id, opponent.account_id, ruleset, board_size, board_size
        );

        callback(MatchEvent::Matched(MatchFound {
            opponent_account_id: opponent.account_id,
            player_term: 1,
            ruleset: ruleset.to_string(),
            board_size,
        }));
        (opponent.callback)(MatchEvent::Matched(MatchFound {
            opponent_account_id: account_id,
            player_term: 2,
            ruleset: opponent.ruleset,
            board_size: opponent.board_size,
        }));

        MatchOutcome::Matched {
            opponent_account_id: opponent.account_id,
        }
    }

    /// Remove every waiting entry of `account_id`, newest first.
    ///
    /// Each removed entry's callback receives [`MatchEvent::Cancelled`].
    /// Returns how many entries were removed.
    pub fn remove_user(&self, account_id: i64) -> usize {
        let removed = take_entries_of(&mut self.waiting(), account_id);
        let count = removed.len();
        if count > 0 {
            debug!("🚪 Removed account {} from matchmaking", account_id);
        }
        cancel_all(removed);
        count
    }

    pub fn is_waiting(&self, account_id: i64) -> bool {
        self.waiting()
            .iter()
            .any(|entry| entry.account_id == account_id)
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting().len()
    }
}

/// Remove `account_id`'s entries, scanning from the most recently added.
fn take_entries_of(waiting: &mut Vec<MatchmakingEntry>, account_id: i64) -> Vec<MatchmakingEntry> {
    let mut removed = Vec::new();
    for index in (0..waiting.len()).rev() {
        if waiting[index].account_id == account_id {
            removed.push(waiting.remove(index));
        }
    }
    removed
}

fn cancel_all(entries: Vec<MatchmakingEntry>) {
    for entry in entries {
        (entry.callback)(MatchEvent::Cancelled);
    }
}
