//! # Server-Side Connection Handle
//!
//! Each accepted socket gets a writer task that drains an outbound queue onto
//! the wire. Everything else (dispatch, handlers, matchmaking callbacks) holds
//! a cheap [`ConnectionHandle`] and pushes responses into that queue, so no
//! component ever writes to a socket directly.

use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::common::connection::FrameWriter;
use crate::common::error::NetError;
use crate::common::messages::Message;

/// Handle to one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Message>,
    /// Account that last identified itself on this connection.
    account: Arc<Mutex<Option<i64>>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new(peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            peer,
            outbound,
            account: Arc::new(Mutex::new(None)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a message for this connection.
    ///
    /// Fails with `MissingDiscriminant` for a message without kind, or
    /// `ConnectionClosed` once the writer task has stopped.
    pub fn send(&self, message: Message) -> Result<(), NetError> {
        message.require_kind()?;
        self.outbound
            .send(message)
            .map_err(|_| NetError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    pub fn bind_account(&self, account_id: i64) {
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) = Some(account_id);
    }

    pub fn account(&self) -> Option<i64> {
        *self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drain `outbound` onto `writer` until every handle is dropped or a write fails.
pub async fn write_loop<W>(
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = writer.write_message(&message).await {
            warn!("⚠️  Failed to write to {}: {}", peer, e);
            // Dropping the receiver makes later sends fail with ConnectionClosed.
            return;
        }
    }

    let _ = writer.shutdown().await;
    debug!("🔌 Writer for {} finished", peer);
}
