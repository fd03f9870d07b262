//! # Persistence Request Queue
//!
//! All storage access is funnelled through one dedicated worker thread that
//! owns the [`Storage`] backend. Requests are executed strictly in submission
//! order and each completion callback fires exactly once, on the worker
//! thread, after its operation has run.
//!
//! ```text
//! handler ──enqueue(op, cb)──▶ [ queue ] ──▶ persistence thread ──▶ Storage
//!                                                   │
//!                                 cb(Ok(reply) | Err(StorageError)) ◀┘
//! ```
//!
//! Handlers that need the result inline use [`PersistenceQueue::call`], which
//! wraps the callback in a oneshot channel and awaits it.

use log::{debug, error, info};
use std::io;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use super::storage::{AccountRecord, GameRecord, NewGame, Storage};
use crate::common::error::StorageError;

/// A storage operation together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateAccount { username: String, password: String },
    CheckCredentials { username: String, password: String },
    GetAccount { account_id: i64 },
    CreateGame(NewGame),
    SaveGame {
        game_id: i64,
        board_state: String,
        next_turn: u8,
    },
    GetGame { game_id: i64 },
    UpdateElo { account_id: i64, elo: i64 },
    TopElos { limit: usize },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::CreateAccount { .. } => "create_account",
            Operation::CheckCredentials { .. } => "check_credentials",
            Operation::GetAccount { .. } => "get_account",
            Operation::CreateGame(_) => "create_game",
            Operation::SaveGame { .. } => "save_game",
            Operation::GetGame { .. } => "get_game",
            Operation::UpdateElo { .. } => "update_elo",
            Operation::TopElos { .. } => "top_elos",
        }
    }
}

/// Successful result of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageReply {
    AccountCreated(i64),
    /// `None` when the credentials did not match.
    Credentials(Option<i64>),
    Account(AccountRecord),
    GameCreated(i64),
    Saved,
    Game(GameRecord),
    TopElos(Vec<AccountRecord>),
}

pub type PersistenceResult = Result<StorageReply, StorageError>;

/// Completion callback; invoked exactly once.
pub type PersistenceCallback = Box<dyn FnOnce(PersistenceResult) + Send>;

struct PersistenceRequest {
    operation: Operation,
    callback: PersistenceCallback,
}

/// Handle for submitting storage operations. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceQueue {
    requests: mpsc::UnboundedSender<PersistenceRequest>,
}

impl PersistenceQueue {
    /// Spawn the persistence worker thread, moving `storage` onto it.
    ///
    /// The worker exits once every `PersistenceQueue` handle is dropped.
    pub fn start<S>(storage: S) -> io::Result<Self>
    where
        S: Storage + Send + 'static,
    {
        let (requests, rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("persistence".to_string())
            .spawn(move || run_worker(storage, rx))?;

        info!("💾 Persistence worker started");
        Ok(Self { requests })
    }

    /// Queue `operation`; `callback` fires later with its result.
    ///
    /// Returns immediately. If the worker is gone the callback fires right
    /// away with `StorageError::Unavailable`.
    pub fn enqueue(&self, operation: Operation, callback: PersistenceCallback) {
        let request = PersistenceRequest {
            operation,
            callback,
        };

        if let Err(mpsc::error::SendError(request)) = self.requests.send(request) {
            error!(
                "❌ Persistence worker is gone, failing {}",
                request.operation.name()
            );
            (request.callback)(Err(StorageError::Unavailable {
                reason: "persistence worker stopped".to_string(),
            }));
        }
    }

    /// Queue `operation` and wait for its result.
    pub async fn call(&self, operation: Operation) -> PersistenceResult {
        let (tx, rx) = oneshot::channel();
        self.enqueue(
            operation,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        rx.await.unwrap_or_else(|_| {
            Err(StorageError::Unavailable {
                reason: "persistence worker dropped the request".to_string(),
            })
        })
    }
}

fn run_worker<S: Storage>(mut storage: S, mut requests: mpsc::UnboundedReceiver<PersistenceRequest>) {
    while let Some(request) = requests.blocking_recv() {
        let name = request.operation.name();
        let result = execute(&mut storage, request.operation);
        if let Err(e) = &result {
            debug!("💾 {} failed: {}", name, e);
        }
        (request.callback)(result);
    }
    info!("💾 Persistence worker stopped");
}

/// Run one operation against the backend.
pub fn execute<S: Storage + ?Sized>(storage: &mut S, operation: Operation) -> PersistenceResult {
    match operation {
        Operation::CreateAccount { username, password } => storage
            .create_account(&username, &password)
            .map(StorageReply::AccountCreated),
        Operation::CheckCredentials { username, password } => storage
            .check_credentials(&username, &password)
            .map(StorageReply::Credentials),
        Operation::GetAccount { account_id } => {
            storage.account(account_id).map(StorageReply::Account)
        }
        Operation::CreateGame(game) => storage.create_game(game).map(StorageReply::GameCreated),
        Operation::SaveGame {
            game_id,
            board_state,
            next_turn,
        } => storage
            .save_game(game_id, &board_state, next_turn)
            .map(|_| StorageReply::Saved),
        Operation::GetGame { game_id } => storage.game(game_id).map(StorageReply::Game),
        Operation::UpdateElo { account_id, elo } => storage
            .update_elo(account_id, elo)
            .map(|_| StorageReply::Saved),
        Operation::TopElos { limit } => storage.top_elos(limit).map(StorageReply::TopElos),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::storage::MemoryStorage;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn create(username: &str) -> Operation {
        Operation::CreateAccount {
            username: username.to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn callbacks_fire_once_each_in_submission_order() {
        let queue = PersistenceQueue::start(MemoryStorage::default()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        const N: usize = 50;
        for i in 0..N {
            let order = order.clone();
            let done_tx = done_tx.clone();
            queue.enqueue(
                create(&format!("user{}", i)),
                Box::new(move |result| {
                    order.lock().unwrap().push((i, result));
                    done_tx.send(()).unwrap();
                }),
            );
        }

        for _ in 0..N {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

        let order = order.lock().unwrap();
        assert_eq!(order.len(), N);
        for (position, (i, result)) in order.iter().enumerate() {
            assert_eq!(*i, position);
            assert_eq!(
                result,
                &Ok(StorageReply::AccountCreated(position as i64 + 1))
            );
        }
    }

    #[tokio::test]
    async fn concurrent_callers_each_get_one_result() {
        let queue = PersistenceQueue::start(MemoryStorage::default()).unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.call(create(&format!("player{}", i))).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(StorageReply::AccountCreated(id)) => ids.push(id),
                other => panic!("unexpected result: {:?}", other),
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn storage_errors_are_reported_not_retried() {
        let queue = PersistenceQueue::start(MemoryStorage::default()).unwrap();
        assert!(queue.call(create("alice")).await.is_ok());
        assert!(matches!(
            queue.call(create("alice")).await,
            Err(StorageError::Conflict { .. })
        ));
        assert!(matches!(
            queue.call(Operation::GetGame { game_id: 5 }).await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
