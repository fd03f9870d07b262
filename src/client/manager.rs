//! # Client Connection Manager
//!
//! Owns the client's single connection to the game server.
//!
//! ## Request/response correlation
//!
//! Every [`send`](ClientConnectionManager::send) registers a callback under the
//! protocol type of the response it expects. Responses carry no request id, so
//! an incoming message resolves the *oldest* callback registered for its kind:
//!
//! ```text
//! send(get_game #1) ─┐
//! send(get_game #2) ─┼─▶ pending["get_game"] = [cb1, cb2, cb3]
//! send(get_game #3) ─┘
//!
//! recv(get_game) ──▶ cb1   recv(get_game) ──▶ cb2   ...
//! ```
//!
//! This relies on the server answering requests of one kind in the order it
//! received them.
//!
//! ## Failure
//!
//! When the connection drops (peer close, read or write error, or an explicit
//! [`disconnect`](ClientConnectionManager::disconnect)) every pending callback
//! is invoked once with the failure. With `auto_reconnect` enabled a new
//! connection is attempted after the configured delay plus some jitter.

use log::{debug, info, warn};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::config::ClientConfig;
use crate::common::connection::{FrameReader, FrameWriter};
use crate::common::error::NetError;
use crate::common::messages::{Message, ProtocolType};

/// Invoked exactly once with the response, or with the reason none will come.
pub type ResponseCallback = Box<dyn FnOnce(Result<Message, NetError>) + Send>;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<(), NetError>> + Send>>;

/// Upper bound of the random delay added to each reconnect attempt.
const RECONNECT_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct ClientConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    state: Mutex<ConnectionState>,
    pending: Mutex<PendingTable>,
    writer: AsyncMutex<Option<FrameWriter<OwnedWriteHalf>>>,
    /// Generation of the live connection, 0 while there is none.
    live: AtomicU64,
    generations: AtomicU64,
    /// Bumped by `disconnect`; a connect attempt started under an older
    /// epoch discards its socket.
    epoch: AtomicU64,
    reconnect: AtomicBool,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

struct PendingRequest {
    /// Submission order across all kinds.
    seq: u64,
    /// Kind of the request that was sent, named by breach notices.
    request_kind: String,
    callback: ResponseCallback,
}

/// Callbacks waiting for a response, queued by expected response kind.
#[derive(Default)]
struct PendingTable {
    next_seq: u64,
    queues: HashMap<String, VecDeque<PendingRequest>>,
}

impl PendingTable {
    fn push(&mut self, expected_kind: &str, request_kind: &str, callback: ResponseCallback) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues
            .entry(expected_kind.to_string())
            .or_default()
            .push_back(PendingRequest {
                seq,
                request_kind: request_kind.to_string(),
                callback,
            });
    }

    /// Oldest callback expecting a response of `kind`.
    fn pop_response(&mut self, kind: &str) -> Option<ResponseCallback> {
        let queue = self.queues.get_mut(kind)?;
        let pending = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(kind);
        }
        pending.map(|pending| pending.callback)
    }

    /// Oldest callback whose request was of `request_kind`, whatever it expected.
    fn pop_rejected(&mut self, request_kind: &str) -> Option<ResponseCallback> {
        let (expected_kind, index) = self
            .queues
            .iter()
            .flat_map(|(expected_kind, queue)| {
                queue
                    .iter()
                    .enumerate()
                    .filter(|(_, pending)| pending.request_kind == request_kind)
                    .map(move |(index, pending)| (pending.seq, expected_kind, index))
            })
            .min_by_key(|(seq, _, _)| *seq)
            .map(|(_, expected_kind, index)| (expected_kind.clone(), index))?;

        let queue = self.queues.get_mut(&expected_kind)?;
        let pending = queue.remove(index);
        if queue.is_empty() {
            self.queues.remove(&expected_kind);
        }
        pending.map(|pending| pending.callback)
    }

    /// Every callback, in submission order.
    fn drain(&mut self) -> Vec<ResponseCallback> {
        let mut drained: Vec<PendingRequest> = self.queues.drain().flat_map(|(_, q)| q).collect();
        drained.sort_by_key(|pending| pending.seq);
        drained.into_iter().map(|pending| pending.callback).collect()
    }

    fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

impl ClientConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                pending: Mutex::new(PendingTable::default()),
                writer: AsyncMutex::new(None),
                live: AtomicU64::new(0),
                generations: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                reconnect: AtomicBool::new(false),
                receiver: Mutex::new(None),
            }),
        }
    }

    /// Connect to the configured server and start the receive loop.
    ///
    /// Does nothing if a connection is already up or being set up.
    pub async fn connect(&self) -> Result<(), NetError> {
        self.inner
            .reconnect
            .store(self.inner.config.client.auto_reconnect, Ordering::SeqCst);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner.clone().connect(epoch).await
    }

    /// Transmit `message` and register `callback` for the next `expected_kind`
    /// response.
    ///
    /// Only a message without `protocol_type` is rejected here. Every other
    /// failure (not connected, write error) is delivered through `callback`.
    /// A breach notice naming the message's own kind fails `callback` with
    /// `UnknownProtocolType`, whatever `expected_kind` was.
    pub async fn send(
        &self,
        message: Message,
        expected_kind: &str,
        callback: ResponseCallback,
    ) -> Result<(), NetError> {
        let request_kind = message.require_kind()?;

        let mut writer = self.inner.writer.lock().await;
        let Some(active) = writer.as_mut() else {
            drop(writer);
            callback(Err(NetError::NotConnected {
                address: self.inner.config.client.server_address.clone(),
            }));
            return Ok(());
        };

        let generation = self.inner.live.load(Ordering::SeqCst);
        lock(&self.inner.pending).push(expected_kind, request_kind, callback);
        let written = active.write_message(&message).await;
        drop(writer);

        if let Err(e) = written {
            warn!("⚠️  Failed to send {}: {}", expected_kind, e);
            self.inner.fail_connection(generation, e, true).await;
        }
        Ok(())
    }

    /// Send `message` and wait for the `expected_kind` response, up to the
    /// configured request timeout.
    pub async fn request(&self, message: Message, expected_kind: &str) -> Result<Message, NetError> {
        let timeout = self.inner.config.request_timeout();
        self.request_with_timeout(message, expected_kind, Some(timeout))
            .await
    }

    /// Like [`request`](Self::request); `None` waits until the response arrives
    /// or the connection fails.
    ///
    /// A timed-out request keeps its place in the pending queue, so the late
    /// response is consumed by it rather than by a newer request.
    pub async fn request_with_timeout(
        &self,
        message: Message,
        expected_kind: &str,
        timeout: Option<Duration>,
    ) -> Result<Message, NetError> {
        let (tx, rx) = oneshot::channel();
        let callback: ResponseCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        self.send(message, expected_kind, callback).await?;

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| NetError::Timeout { after: limit })?,
            None => rx.await,
        };
        outcome.unwrap_or(Err(NetError::ConnectionClosed))
    }

    /// Close the connection and fail every pending callback.
    ///
    /// No reconnect follows, including one already in progress. Calling it
    /// again is harmless.
    pub async fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.reconnect.store(false, Ordering::SeqCst);

        // A connect that passed its epoch check finishes installing first.
        drop(self.inner.writer.lock().await);

        if let Some(task) = lock(&self.inner.receiver).take() {
            task.abort();
        }
        let generation = self.inner.live.load(Ordering::SeqCst);
        self.inner
            .fail_connection(generation, NetError::ConnectionClosed, false)
            .await;
        *lock(&self.inner.state) = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of callbacks still waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn server_address(&self) -> &str {
        &self.inner.config.client.server_address
    }
}

impl Drop for ClientConnectionManager {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.reconnect.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.inner.receiver).take() {
            task.abort();
        }
    }
}

impl Inner {
    /// Connect unless `disconnect` has run since `epoch` was read.
    fn connect(self: Arc<Self>, epoch: u64) -> ConnectFuture {
        Box::pin(async move {
            {
                let mut state = lock(&self.state);
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    return Err(NetError::ConnectionClosed);
                }
                if *state != ConnectionState::Disconnected {
                    return Ok(());
                }
                *state = ConnectionState::Connecting;
            }

            let address = self.config.client.server_address.clone();
            let stream = match TcpStream::connect(&address).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.settle(epoch, ConnectionState::Disconnected);
                    warn!("❌ Could not connect to {}: {}", address, e);
                    return Err(NetError::from(e));
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not disable Nagle for {}: {}", address, e);
            }

            let (read_half, write_half) = stream.into_split();
            let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

            let mut writer = self.writer.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!("Dropping connection to {}: disconnected meanwhile", address);
                return Err(NetError::ConnectionClosed);
            }
            *writer = Some(FrameWriter::new(write_half));
            self.live.store(generation, Ordering::SeqCst);
            *lock(&self.state) = ConnectionState::Connected;
            let task = tokio::spawn(receive_loop(
                self.clone(),
                FrameReader::new(read_half),
                generation,
            ));
            *lock(&self.receiver) = Some(task);
            drop(writer);

            info!("🔗 Connected to game server at {}", address);
            Ok(())
        })
    }

    /// Set the state unless a `disconnect` has superseded `epoch`.
    fn settle(&self, epoch: u64, next: ConnectionState) {
        let mut state = lock(&self.state);
        if self.epoch.load(Ordering::SeqCst) == epoch {
            *state = next;
        }
    }

    /// Hand an incoming message to the oldest callback waiting for its kind.
    fn resolve(&self, message: Message) {
        let Some(kind) = message.kind().map(str::to_string) else {
            warn!("⚠️  Dropping response without protocol_type");
            return;
        };

        // A breach notice answers the request the server did not understand.
        if kind == ProtocolType::Breach.as_str() {
            let offending: String = message.field("offending_type").unwrap_or_default();
            let rejected = lock(&self.pending).pop_rejected(&offending);
            match rejected {
                Some(callback) => callback(Err(NetError::UnknownProtocolType { kind: offending })),
                None => warn!("🚫 Server rejected unknown protocol type `{}`", offending),
            }
            return;
        }

        let waiting = lock(&self.pending).pop_response(&kind);
        match waiting {
            Some(callback) => callback(Ok(message)),
            None => warn!("📭 Unsolicited {} response dropped", kind),
        }
    }

    /// Tear down connection `generation` and fail every pending callback.
    ///
    /// Stale events for a connection that has already been replaced are ignored.
    async fn fail_connection(self: &Arc<Self>, generation: u64, reason: NetError, reconnect: bool) {
        let was_live = generation != 0
            && self
                .live
                .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
        if !was_live && self.live.load(Ordering::SeqCst) != 0 {
            return;
        }

        if was_live {
            let writer = self.writer.lock().await.take();
            if let Some(mut writer) = writer {
                let _ = writer.shutdown().await;
            }
            *lock(&self.state) = ConnectionState::Disconnected;
            warn!(
                "⚠️  Connection to {} closed: {}",
                self.config.client.server_address, reason
            );
        }

        self.fail_pending(&reason);

        if was_live && reconnect && self.reconnect.load(Ordering::SeqCst) {
            schedule_reconnect(self.clone(), self.epoch.load(Ordering::SeqCst));
        }
    }

    fn fail_pending(&self, reason: &NetError) {
        let drained = lock(&self.pending).drain();
        if !drained.is_empty() {
            debug!("Failing {} pending callbacks: {}", drained.len(), reason);
        }
        for callback in drained {
            callback(Err(reason.clone()));
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, mut reader: FrameReader<OwnedReadHalf>, generation: u64) {
    let reason = loop {
        match reader.read_messages().await {
            Ok(Some(messages)) => {
                for message in messages {
                    inner.resolve(message);
                }
            }
            Ok(None) => break NetError::ConnectionClosed,
            Err(e) => break e,
        }
    };
    inner.fail_connection(generation, reason, true).await;
}

fn schedule_reconnect(inner: Arc<Inner>, epoch: u64) {
    let jitter = rand::thread_rng().gen_range(0..RECONNECT_JITTER_MS);
    let delay = inner.config.reconnect_delay() + Duration::from_millis(jitter);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(delay).await;
            if !inner.reconnect.load(Ordering::SeqCst) || inner.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            info!("🔄 Reconnecting to {}...", inner.config.client.server_address);
            match inner.clone().connect(epoch).await {
                Ok(()) => return,
                Err(e) => debug!("Reconnect failed: {}", e),
            }
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(address: String, auto_reconnect: bool) -> ClientConfig {
        let mut config = ClientConfig::with_address(address);
        config.client.request_timeout_secs = 5;
        config.client.auto_reconnect = auto_reconnect;
        config.client.reconnect_delay_secs = 0;
        config
    }

    /// A manager connected to a bare listener, plus the server side of the socket.
    async fn connected_pair(
        auto_reconnect: bool,
    ) -> (
        ClientConnectionManager,
        TcpListener,
        FrameReader<OwnedReadHalf>,
        FrameWriter<OwnedWriteHalf>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let manager = ClientConnectionManager::new(config(address, auto_reconnect));
        manager.connect().await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = socket.into_split();
        (
            manager,
            listener,
            FrameReader::new(read_half),
            FrameWriter::new(write_half),
        )
    }

    async fn read_n(reader: &mut FrameReader<OwnedReadHalf>, n: usize) -> Vec<Message> {
        let mut received = Vec::new();
        while received.len() < n {
            let batch = timeout(WAIT, reader.read_messages())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            received.extend(batch);
        }
        received
    }

    fn recorder() -> (
        mpsc::UnboundedSender<(i64, Result<Message, NetError>)>,
        mpsc::UnboundedReceiver<(i64, Result<Message, NetError>)>,
    ) {
        mpsc::unbounded_channel()
    }

    fn record(tx: &mpsc::UnboundedSender<(i64, Result<Message, NetError>)>, id: i64) -> ResponseCallback {
        let tx = tx.clone();
        Box::new(move |result| {
            let _ = tx.send((id, result));
        })
    }

    #[tokio::test]
    async fn responses_resolve_callbacks_oldest_first() {
        let (manager, _listener, mut reader, mut writer) = connected_pair(false).await;
        let (tx, mut rx) = recorder();

        for id in 1..=3 {
            let request = Message::new(ProtocolType::GetGame).with("game_id", id);
            manager.send(request, "get_game", record(&tx, id)).await.unwrap();
        }
        assert_eq!(manager.pending_count(), 3);

        let requests = read_n(&mut reader, 3).await;
        for request in &requests {
            let game_id: i64 = request.field("game_id").unwrap();
            let response = Message::new(ProtocolType::GetGame)
                .with("success", true)
                .with("game_id", game_id);
            writer.write_message(&response).await.unwrap();
        }

        for expected in 1..=3 {
            let (id, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(id, expected);
            assert_eq!(result.unwrap().field::<i64>("game_id").unwrap(), expected);
        }
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn kinds_are_correlated_independently() {
        let (manager, _listener, mut reader, mut writer) = connected_pair(false).await;
        let (tx, mut rx) = recorder();

        manager
            .send(Message::new(ProtocolType::GetGame), "get_game", record(&tx, 1))
            .await
            .unwrap();
        manager
            .send(Message::new(ProtocolType::GetTopElos), "get_top_elos", record(&tx, 2))
            .await
            .unwrap();
        read_n(&mut reader, 2).await;

        // Answer in the opposite order.
        writer
            .write_message(&Message::new(ProtocolType::GetTopElos).with("success", true))
            .await
            .unwrap();
        writer
            .write_message(&Message::new(ProtocolType::GetGame).with("success", true))
            .await
            .unwrap();

        let (first, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, 2);
        assert_eq!(result.unwrap().kind(), Some("get_top_elos"));
        let (second, _) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn message_without_kind_is_rejected_synchronously() {
        let (manager, _listener, _reader, _writer) = connected_pair(false).await;
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let result = manager
            .send(
                Message::empty().with("username", "alice"),
                "create_account",
                Box::new(move |_| flag.store(true, Ordering::SeqCst)),
            )
            .await;

        assert_eq!(result, Err(NetError::MissingDiscriminant));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn sending_while_disconnected_fails_through_the_callback() {
        let manager = ClientConnectionManager::new(config("127.0.0.1:9".to_string(), false));
        let (tx, mut rx) = recorder();

        manager
            .send(Message::new(ProtocolType::GetGame), "get_game", record(&tx, 1))
            .await
            .unwrap();

        let (_, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(result, Err(NetError::NotConnected { .. })));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn peer_close_fails_every_pending_callback_once() {
        let (manager, _listener, reader, writer) = connected_pair(false).await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            manager
                .send(
                    Message::new(ProtocolType::SaveGame),
                    "save_game",
                    Box::new(move |result| {
                        assert_eq!(result, Err(NetError::ConnectionClosed));
                        calls.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .await
                .unwrap();
        }

        drop(reader);
        drop(writer);

        timeout(WAIT, async {
            while calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (manager, _listener, _reader, _writer) = connected_pair(false).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        manager
            .send(
                Message::new(ProtocolType::GetGame),
                "get_game",
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn breach_notice_fails_the_offending_request() {
        let (manager, _listener, mut reader, mut writer) = connected_pair(false).await;

        let request = tokio::spawn(async move {
            let result = manager
                .request(Message::new("teleport"), "teleport")
                .await;
            (manager, result)
        });

        read_n(&mut reader, 1).await;
        writer
            .write_message(&crate::common::messages::breach_notice("teleport"))
            .await
            .unwrap();

        let (manager, result) = timeout(WAIT, request).await.unwrap().unwrap();
        assert_eq!(
            result,
            Err(NetError::UnknownProtocolType {
                kind: "teleport".to_string()
            })
        );
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_times_out_but_keeps_its_slot() {
        let (manager, _listener, mut reader, mut writer) = connected_pair(false).await;

        let result = manager
            .request_with_timeout(
                Message::new(ProtocolType::GetGame).with("game_id", 1),
                "get_game",
                Some(Duration::from_millis(50)),
            )
            .await;
        assert_eq!(
            result,
            Err(NetError::Timeout {
                after: Duration::from_millis(50)
            })
        );
        assert_eq!(manager.pending_count(), 1);

        // The late response is absorbed by the timed-out request.
        read_n(&mut reader, 1).await;
        writer
            .write_message(&Message::new(ProtocolType::GetGame).with("game_id", 1))
            .await
            .unwrap();
        timeout(WAIT, async {
            while manager.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_the_server_drops_the_connection() {
        let (manager, listener, reader, writer) = connected_pair(true).await;
        drop(reader);
        drop(writer);

        let (socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        timeout(WAIT, async {
            while !manager.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (read_half, write_half) = socket.into_split();
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);
        let pending = tokio::spawn(async move {
            manager
                .request(Message::new(ProtocolType::GetTopElos), "get_top_elos")
                .await
        });
        read_n(&mut reader, 1).await;
        writer
            .write_message(&Message::new(ProtocolType::GetTopElos).with("success", true))
            .await
            .unwrap();

        let response = timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
        assert!(response.success());
    }

    #[tokio::test]
    async fn breach_notice_fails_the_sender_whatever_it_expected() {
        let (manager, _listener, mut reader, mut writer) = connected_pair(false).await;
        let (tx, mut rx) = recorder();

        manager
            .send(Message::new(ProtocolType::GetGame), "get_game", record(&tx, 1))
            .await
            .unwrap();
        manager
            .send(Message::new("teleport"), "get_game", record(&tx, 2))
            .await
            .unwrap();
        read_n(&mut reader, 2).await;

        writer
            .write_message(&crate::common::messages::breach_notice("teleport"))
            .await
            .unwrap();
        let (id, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(id, 2);
        assert!(matches!(result, Err(NetError::UnknownProtocolType { .. })));

        // The get_game queue is still aligned with the server's replies.
        writer
            .write_message(&Message::new(ProtocolType::GetGame).with("success", true))
            .await
            .unwrap();
        let (id, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(id, 1);
        assert!(result.unwrap().success());
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_fails_the_queued_callback() {
        let (manager, _listener, _reader, _writer) = connected_pair(false).await;
        manager
            .inner
            .writer
            .lock()
            .await
            .as_mut()
            .unwrap()
            .shutdown()
            .await
            .unwrap();
        let (tx, mut rx) = recorder();

        let sent = manager
            .send(Message::new(ProtocolType::SaveGame), "save_game", record(&tx, 1))
            .await;

        assert_eq!(sent, Ok(()));
        let (_, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(result, Err(NetError::Transport { .. })));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn connect_started_before_disconnect_is_discarded() {
        let (manager, listener, _reader, _writer) = connected_pair(true).await;
        let epoch = manager.inner.epoch.load(Ordering::SeqCst);

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // An attempt that began before `disconnect`, such as a pending reconnect.
        let result = manager.inner.clone().connect(epoch).await;
        assert_eq!(result, Err(NetError::ConnectionClosed));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.inner.writer.lock().await.is_none());
        assert!(timeout(Duration::from_millis(100), listener.accept()).await.is_err());

        // An explicit connect afterwards still works.
        manager.connect().await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn disconnect_while_connecting_stays_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let manager = Arc::new(ClientConnectionManager::new(config(address, true)));
        let epoch = manager.inner.epoch.load(Ordering::SeqCst);

        // Hold the writer lock so the attempt stalls after its TCP handshake.
        let guard = manager.inner.writer.lock().await;
        let attempt = tokio::spawn(manager.inner.clone().connect(epoch));
        timeout(WAIT, async {
            while manager.state() != ConnectionState::Connecting {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let disconnecting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.disconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        timeout(WAIT, disconnecting).await.unwrap().unwrap();
        let result = timeout(WAIT, attempt).await.unwrap().unwrap();
        assert_eq!(result, Err(NetError::ConnectionClosed));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.inner.writer.lock().await.is_none());
        assert_eq!(manager.inner.live.load(Ordering::SeqCst), 0);
    }
}
