use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Server-wide counters, shared by the connection manager and dispatch.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    connections_accepted: Arc<AtomicU64>,
    connections_open: Arc<AtomicU64>,
    messages_dispatched: Arc<AtomicU64>,
    breach_notices: Arc<AtomicU64>,
    matches_made: Arc<AtomicU64>,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_open: u64,
    pub messages_dispatched: u64,
    pub breach_notices: u64,
    pub matches_made: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn breach_sent(&self) {
        self.breach_notices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_made(&self) {
        self.matches_made.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_open: self.connections_open.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            breach_notices: self.breach_notices.load(Ordering::Relaxed),
            matches_made: self.matches_made.load(Ordering::Relaxed),
        }
    }
}
