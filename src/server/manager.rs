//! # Server Connection Manager
//!
//! Owns the listening socket. Every accepted connection runs in its own task:
//!
//! ```text
//! accept ──▶ spawn ──▶ read loop: socket → FrameReader → Dispatcher
//!                 └──▶ writer task: ConnectionHandle queue → FrameWriter → socket
//! ```
//!
//! A connection that errors or panics is logged and dropped; the accept loop
//! and the other connections are unaffected.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use super::connection::{write_loop, ConnectionHandle};
use super::dispatch::Dispatcher;
use super::metrics::ServerStats;
use crate::common::connection::{FrameReader, FrameWriter};
use crate::common::error::NetError;

pub struct ServerConnectionManager {
    address: String,
    dispatcher: Dispatcher,
    stats: ServerStats,
}

impl ServerConnectionManager {
    pub fn new(address: String, dispatcher: Dispatcher, stats: ServerStats) -> Self {
        Self {
            address,
            dispatcher,
            stats,
        }
    }

    /// Bind the configured address and accept connections forever.
    pub async fn listen(self: Arc<Self>) -> Result<(), NetError> {
        let listener = TcpListener::bind(&self.address).await.map_err(|e| {
            error!("❌ Failed to bind to {}: {}", self.address, e);
            NetError::from(e)
        })?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener, forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), NetError> {
        info!("📡 Game server listening on {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("🔗 Accepted connection from {}", peer);
                    self.spawn_connection(socket, peer);
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.handle_connection(socket, peer).await });

        // Supervise the connection task so a panic is logged rather than lost.
        let stats = self.stats.clone();
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => debug!("🔌 Connection from {} closed", peer),
                Ok(Err(e)) => warn!("⚠️  Connection from {} dropped: {}", peer, e),
                Err(e) => {
                    error!("❌ Connection handler for {} failed: {}", peer, e);
                    stats.connection_closed();
                }
            }
        });
    }

    async fn handle_connection(&self, socket: TcpStream, peer: SocketAddr) -> Result<(), NetError> {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", peer, e);
        }

        let (read_half, write_half) = socket.into_split();
        let (connection, outbound) = ConnectionHandle::new(peer);
        tokio::spawn(write_loop(FrameWriter::new(write_half), outbound, peer));

        self.stats.connection_opened();
        info!("👋 Client {} connected ({})", peer, connection.id());

        let result = self.read_loop(FrameReader::new(read_half), &connection).await;

        self.stats.connection_closed();
        if let Err(e) = self.dispatcher.connection_closed(connection) {
            warn!("⚠️  Could not report closed connection {}: {}", peer, e);
        }
        info!("👋 Client {} disconnected", peer);

        result
    }

    /// Hand every complete message to dispatch, in receipt order.
    async fn read_loop(
        &self,
        mut reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
        connection: &ConnectionHandle,
    ) -> Result<(), NetError> {
        while let Some(messages) = reader.read_messages().await? {
            for message in messages {
                self.dispatcher.dispatch(message, connection.clone())?;
            }
        }
        Ok(())
    }
}
