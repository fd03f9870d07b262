//! # Response Handler Dispatch
//!
//! Every inbound message, from every connection, is turned into a job on one
//! serial worker. The worker parses the message into a typed
//! [`Request`](super::handlers::Request) (the quick validation step), awaits
//! its response (which may wait on the persistence queue) and sends the
//! result back on the originating connection.
//!
//! Serializing all handlers means their side effects never race; the cost is
//! that a slow storage round-trip delays everyone, which is acceptable for
//! turn-based play.
//!
//! Besides inbound messages the worker runs two kinds of follow-up jobs:
//! match notices fired by the matchmaker, and cleanup when a connection closes.

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::ConnectionHandle;
use super::handlers::{self, HandlerContext, MatchedGames, Request};
use super::matchmaker::{MatchEvent, Matchmaker};
use super::metrics::ServerStats;
use super::persistence::PersistenceQueue;
use crate::common::error::NetError;
use crate::common::messages::{breach_notice, failure, Message, ProtocolType};

/// Shared state the handlers work against.
pub struct Services {
    pub persistence: PersistenceQueue,
    pub matchmaker: Matchmaker,
    /// Games allocated by completed matches, not yet announced to both seats.
    pub matched_games: MatchedGames,
    pub stats: ServerStats,
    /// Default number of entries returned by `get_top_elos`.
    pub top_elos_limit: usize,
}

/// Unit of work for the dispatch worker.
pub enum Job {
    /// A message read from a client connection.
    Inbound {
        message: Message,
        connection: ConnectionHandle,
    },
    /// The matchmaker resolved a `matchmaker` request of `account_id`.
    MatchNotice {
        connection: ConnectionHandle,
        account_id: i64,
        event: MatchEvent,
    },
    /// The connection's socket was closed.
    ConnectionClosed { connection: ConnectionHandle },
}

impl Job {
    /// Connection and kind of the reply this job owes, if any.
    fn reply_to(&self) -> Option<(ConnectionHandle, String)> {
        match self {
            Job::Inbound {
                message,
                connection,
            } => message
                .kind()
                .map(|kind| (connection.clone(), kind.to_string())),
            Job::MatchNotice { connection, .. } => Some((
                connection.clone(),
                ProtocolType::Matchmaker.as_str().to_string(),
            )),
            Job::ConnectionClosed { .. } => None,
        }
    }
}

/// Sending side of the dispatch queue. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the serial worker on the current tokio runtime.
    ///
    /// The worker stops once every `Dispatcher` clone is dropped.
    pub fn start(services: Arc<Services>) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let follow_ups = jobs.downgrade();
        tokio::spawn(run_worker(rx, services, follow_ups));
        Self { jobs }
    }

    /// Queue an inbound message for handling.
    pub fn dispatch(&self, message: Message, connection: ConnectionHandle) -> Result<(), NetError> {
        self.submit(Job::Inbound {
            message,
            connection,
        })
    }

    /// Tell the worker a connection has gone away.
    pub fn connection_closed(&self, connection: ConnectionHandle) -> Result<(), NetError> {
        self.submit(Job::ConnectionClosed { connection })
    }

    fn submit(&self, job: Job) -> Result<(), NetError> {
        self.jobs.send(job).map_err(|_| NetError::Transport {
            reason: "dispatch worker stopped".to_string(),
        })
    }
}

async fn run_worker(
    mut jobs: mpsc::UnboundedReceiver<Job>,
    services: Arc<Services>,
    follow_ups: mpsc::WeakUnboundedSender<Job>,
) {
    info!("🧵 Dispatch worker started");

    while let Some(job) = jobs.recv().await {
        let reply_to = job.reply_to();

        // Run each job in its own task so a panicking handler only loses that job.
        let task = tokio::spawn(process(job, services.clone(), follow_ups.clone()));
        if let Err(e) = task.await {
            error!("❌ Dispatch job failed: {}", e);
            // The client still expects one reply of this kind.
            if let Some((connection, kind)) = reply_to {
                deliver(&connection, failure(&kind, "internal error"));
            }
        }
    }

    info!("🧵 Dispatch worker stopped");
}

async fn process(
    job: Job,
    services: Arc<Services>,
    follow_ups: mpsc::WeakUnboundedSender<Job>,
) {
    match job {
        Job::Inbound {
            message,
            connection,
        } => {
            services.stats.message_dispatched();
            let kind = message.kind().unwrap_or_default().to_string();

            let request = match Request::from_message(&message) {
                Ok(request) => request,
                Err(NetError::UnknownProtocolType { kind }) => {
                    warn!(
                        "🚫 Unknown protocol type `{}` from {}, sending breach notice",
                        kind,
                        connection.peer()
                    );
                    services.stats.breach_sent();
                    deliver(&connection, breach_notice(&kind));
                    return;
                }
                Err(e) => {
                    debug!("🚫 Rejecting {} from {}: {}", kind, connection.peer(), e);
                    deliver(&connection, failure(&kind, e));
                    return;
                }
            };

            debug!("📨 Handling {} from {}", kind, connection.peer());
            let ctx = HandlerContext {
                services: &services,
                connection: &connection,
                follow_ups: &follow_ups,
            };
            if let Some(reply) = request.respond(&ctx).await {
                deliver(&connection, reply);
            }
        }

        Job::MatchNotice {
            connection,
            account_id,
            event,
        } => {
            let reply = handlers::match_notice(&services, account_id, event).await;
            deliver(&connection, reply);
        }

        Job::ConnectionClosed { connection } => {
            if let Some(account_id) = connection.account() {
                let removed = services.matchmaker.remove_user(account_id);
                if removed > 0 {
                    info!(
                        "🚪 Account {} disconnected, left matchmaking ({} entries)",
                        account_id, removed
                    );
                }
            }
        }
    }
}

fn deliver(connection: &ConnectionHandle, reply: Message) {
    if let Err(e) = connection.send(reply) {
        debug!("📭 Dropping reply for {}: {}", connection.peer(), e);
    }
}
