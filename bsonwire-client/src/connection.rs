//! Connection management.
//!
//! A [`Connection`] is a fixed-size pool of sockets to one server. Each
//! socket has a reader task that reassembles replies from its byte stream
//! and hands them to the shared pending-request table. When a socket drops
//! with auto reconnect on, the pool moves to [`ConnectionState::Connecting`],
//! sends are queued, and the queue is flushed in order once the pool is back.

use crate::command;
use crate::config::{ClientOptions, Credentials, ServerAddress};
use crate::error::ClientError;
use crate::pending::{PendingGuard, PendingTable, ReplySender};
use bsonwire_protocol::auth::{authenticate_command, getnonce_command};
use bsonwire_protocol::{MessageBuffer, MessageHeader, Query, Reply, WireMessage};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Read buffer size per socket.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Lifecycle of a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// Which pooled socket a message goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    RoundRobin,
    /// A socket picked with [`Connection::checkout`]. Cursors and safe
    /// writes pin their follow-up messages this way.
    Socket(usize),
}

/// What happened to a fire-and-forget send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Written,
    /// Held until the pool reconnects.
    Queued,
}

struct Outgoing {
    request_id: i32,
    bytes: Bytes,
    dispatch: Dispatch,
    reply: Option<ReplySender>,
}

#[derive(Default)]
struct SocketSlot {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    address: ServerAddress,
    options: ClientOptions,
    sockets: Vec<SocketSlot>,
    next_socket: AtomicUsize,
    /// Bumped each time the pool is reopened; reader tasks of older sockets
    /// carry a stale value and their disconnects are ignored.
    generation: AtomicU64,
    /// Lock order: `queue` before `state`.
    queue: Mutex<VecDeque<Outgoing>>,
    state: Mutex<ConnectionState>,
    pending: Arc<PendingTable>,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    /// `(database, credentials)` pairs replayed on every reconnect.
    credentials: Mutex<Vec<(String, Credentials)>>,
}

/// A pooled connection to one server. Cloning shares the pool.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

impl Connection {
    /// Opens `options.pool_size` sockets to `address`.
    pub async fn connect(address: ServerAddress, options: ClientOptions) -> Result<Self, ClientError> {
        options.validate()?;
        let sockets = (0..options.pool_size).map(|_| SocketSlot::default()).collect();
        let shared = Arc::new(Shared {
            address,
            options,
            sockets,
            next_socket: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
            state: Mutex::new(ConnectionState::Connecting),
            pending: Arc::new(PendingTable::new()),
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            credentials: Mutex::new(Vec::new()),
        });

        tracing::debug!(
            "Connecting to {} with {} socket(s)",
            shared.address,
            shared.sockets.len()
        );
        if let Err(e) = shared.open_sockets().await {
            shared.close_sockets().await;
            *shared.state.lock() = ConnectionState::Closed;
            return Err(e);
        }
        *shared.state.lock() = ConnectionState::Open;
        tracing::debug!("Connected to {}", shared.address);

        Ok(Self { shared })
    }

    /// Sends a message and waits for the reply whose `response_to` matches
    /// its request id.
    pub async fn request<M: WireMessage>(&self, message: &M, dispatch: Dispatch) -> Result<Reply, ClientError> {
        let request_id = message.request_id();
        let bytes = message.encode()?.freeze();
        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard::new(Arc::clone(&self.shared.pending), request_id);

        self.shared
            .dispatch(Outgoing {
                request_id,
                bytes,
                dispatch,
                reply: Some(tx),
            })
            .await?;

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Sends a message that gets no reply (writes, KillCursors).
    pub async fn send<M: WireMessage>(&self, message: &M, dispatch: Dispatch) -> Result<SendOutcome, ClientError> {
        let bytes = message.encode()?.freeze();
        self.shared
            .dispatch(Outgoing {
                request_id: message.request_id(),
                bytes,
                dispatch,
                reply: None,
            })
            .await
    }

    /// Picks the next socket round-robin, for pinning a sequence of messages.
    pub fn checkout(&self) -> usize {
        self.shared.next_index()
    }

    /// Runs the nonce challenge-response on every socket and remembers the
    /// credentials so reconnects authenticate again.
    pub async fn authenticate(&self, db: &str, credentials: Credentials) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Open => {}
            ConnectionState::Connecting => return Err(ClientError::ReconnectInProgress),
            ConnectionState::Closed => return Err(ClientError::NotConnected),
        }

        for index in 0..self.shared.sockets.len() {
            self.shared.authenticate_socket(index, db, &credentials).await?;
        }
        tracing::debug!(
            "Authenticated as {} on {}/{}",
            credentials.username,
            self.shared.address,
            db
        );

        let mut stored = self.shared.credentials.lock();
        stored.retain(|(stored_db, _)| stored_db != db);
        stored.push((db.to_string(), credentials));
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Requests written and still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Messages held while reconnecting.
    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn address(&self) -> &ServerAddress {
        &self.shared.address
    }

    pub fn pool_size(&self) -> usize {
        self.shared.sockets.len()
    }

    /// Closes every socket. Queued and in-flight requests fail with
    /// [`ClientError::ConnectionClosed`].
    pub async fn close(&self) {
        tracing::debug!("Closing connection to {}", self.shared.address);
        self.shared.closed.store(true, Ordering::SeqCst);

        let drained: Vec<Outgoing> = {
            let mut queue = self.shared.queue.lock();
            *self.shared.state.lock() = ConnectionState::Closed;
            queue.drain(..).collect()
        };
        fail_outgoing(drained, || ClientError::ConnectionClosed);

        self.shared.close_sockets().await;
        let failed = self.shared.pending.fail_all(|| ClientError::ConnectionClosed);
        tracing::debug!(
            "Connection to {} closed, {} pending request(s) failed",
            self.shared.address,
            failed
        );
    }
}

impl Shared {
    fn next_index(&self) -> usize {
        self.next_socket.fetch_add(1, Ordering::Relaxed) % self.sockets.len()
    }

    fn socket_index(&self, dispatch: Dispatch) -> usize {
        match dispatch {
            Dispatch::RoundRobin => self.next_index(),
            Dispatch::Socket(index) => index % self.sockets.len(),
        }
    }

    async fn dispatch(self: &Arc<Self>, mut outgoing: Outgoing) -> Result<SendOutcome, ClientError> {
        loop {
            {
                let mut queue = self.queue.lock();
                let mut state = self.state.lock();
                let current = *state;
                if current != ConnectionState::Open {
                    if self.closed.load(Ordering::SeqCst) || !self.options.auto_reconnect {
                        return Err(ClientError::NotConnected);
                    }
                    *state = ConnectionState::Connecting;
                    queue.push_back(outgoing);
                    drop(state);
                    drop(queue);
                    tracing::debug!("Queued request while reconnecting to {}", self.address);
                    self.spawn_reconnect();
                    return Ok(SendOutcome::Queued);
                }
            }

            let generation = self.generation.load(Ordering::SeqCst);
            match self.write(outgoing).await {
                Ok(()) => return Ok(SendOutcome::Written),
                Err((returned, err)) => {
                    tracing::debug!("Write to {} failed: {}", self.address, err);
                    self.on_disconnect(generation);
                    if !self.options.auto_reconnect {
                        return Err(err);
                    }
                    outgoing = returned;
                }
            }
        }
    }

    /// Writes one message. A failed message is handed back with its waiter
    /// so it can be queued again.
    async fn write(&self, mut outgoing: Outgoing) -> Result<(), (Outgoing, ClientError)> {
        let index = self.socket_index(outgoing.dispatch);
        let mut writer = self.sockets[index].writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err((outgoing, ClientError::NotConnected));
        };

        if let Some(tx) = outgoing.reply.take() {
            self.pending.register(outgoing.request_id, index, tx);
        }
        match stream.write_all(&outgoing.bytes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                outgoing.reply = self.pending.take(outgoing.request_id);
                Err((outgoing, ClientError::Io(e)))
            }
        }
    }

    /// Writes a message on one socket regardless of the connection state.
    /// Used while restoring the pool, before queued messages are flushed.
    async fn request_on(&self, message: &Query, index: usize) -> Result<Reply, ClientError> {
        let request_id = message.request_id();
        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard::new(Arc::clone(&self.pending), request_id);
        let outgoing = Outgoing {
            request_id,
            bytes: message.encode()?.freeze(),
            dispatch: Dispatch::Socket(index),
            reply: Some(tx),
        };
        self.write(outgoing).await.map_err(|(_, err)| err)?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    async fn authenticate_socket(&self, index: usize, db: &str, credentials: &Credentials) -> Result<(), ClientError> {
        let reply = self.request_on(&Query::command(db, getnonce_command()), index).await?;
        let nonce_doc = command::reply_document(reply)?;
        let nonce = nonce_doc
            .get_str("nonce")
            .ok_or_else(|| ClientError::AuthFailed("getnonce reply carried no nonce".into()))?;

        let authenticate = Query::command(
            db,
            authenticate_command(&credentials.username, nonce, &credentials.password),
        );
        let reply = self.request_on(&authenticate, index).await?;
        command::reply_document(reply).map_err(|e| match e {
            ClientError::ServerError { message, .. } => ClientError::AuthFailed(message),
            other => other,
        })?;
        Ok(())
    }

    async fn connect_socket(&self) -> Result<TcpStream, ClientError> {
        let stream = tokio::time::timeout(
            self.options.connect_timeout(),
            TcpStream::connect((self.address.host.as_str(), self.address.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connect to {} timed out", self.address);
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connect to {} failed: {}", self.address, e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    /// Connects every slot, then starts a reader task per socket.
    async fn open_sockets(self: &Arc<Self>) -> Result<(), ClientError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut streams = Vec::with_capacity(self.sockets.len());
        for _ in 0..self.sockets.len() {
            streams.push(self.connect_socket().await?);
        }

        for (index, (slot, stream)) in self.sockets.iter().zip(streams).enumerate() {
            let (read_half, write_half) = stream.into_split();
            let handle = tokio::spawn(read_loop(Arc::downgrade(self), read_half, index, generation));
            let previous = slot.reader.lock().replace(handle);
            if let Some(previous) = previous {
                previous.abort();
            }
            *slot.writer.lock().await = Some(write_half);
        }
        Ok(())
    }

    async fn close_sockets(&self) {
        for slot in &self.sockets {
            let reader = slot.reader.lock().take();
            if let Some(reader) = reader {
                reader.abort();
            }
            let writer = slot.writer.lock().await.take();
            if let Some(mut writer) = writer {
                let _ = writer.shutdown().await;
            }
        }
    }

    fn deliver(&self, message: &[u8]) {
        match Reply::parse(message) {
            Ok(reply) => {
                self.pending.complete(reply);
            }
            Err(e) => {
                tracing::warn!("Discarding malformed reply from {}: {}", self.address, e);
                if let Ok(header) = MessageHeader::decode(message) {
                    self.pending.fail(header.response_to, ClientError::Protocol(e));
                }
            }
        }
    }

    /// A socket of `generation` failed. Requests in flight fail; with auto
    /// reconnect the pool starts reconnecting, otherwise it is closed.
    fn on_disconnect(self: &Arc<Self>, generation: u64) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let _queue = self.queue.lock();
            let mut state = self.state.lock();
            if *state != ConnectionState::Open || self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            *state = if self.options.auto_reconnect {
                ConnectionState::Connecting
            } else {
                ConnectionState::Closed
            };
        }

        let failed = self.pending.fail_all(|| ClientError::ConnectionClosed);
        tracing::warn!(
            "Lost connection to {}, {} request(s) in flight failed",
            self.address,
            failed
        );

        if self.options.auto_reconnect {
            self.spawn_reconnect();
        } else {
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.close_sockets().await });
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.reconnect().await });
    }

    async fn reconnect(self: Arc<Self>) {
        self.close_sockets().await;

        let attempts = self.options.max_reconnect_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.options.reconnect_interval() * attempt).await;
            if self.closed.load(Ordering::SeqCst) {
                self.reconnecting.store(false, Ordering::SeqCst);
                return;
            }

            tracing::info!(
                "Reconnecting to {} (attempt {}/{})",
                self.address,
                attempt,
                attempts
            );
            match self.restore().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!("Reconnect to {} failed: {}", self.address, e);
                    self.close_sockets().await;
                }
            }
        }

        self.give_up();
    }

    async fn restore(self: &Arc<Self>) -> Result<(), ClientError> {
        self.open_sockets().await?;
        if self.abandon_if_closed().await {
            return Ok(());
        }

        let credentials = self.credentials.lock().clone();
        for (db, credentials) in &credentials {
            for index in 0..self.sockets.len() {
                self.authenticate_socket(index, db, credentials).await?;
            }
        }
        if self.abandon_if_closed().await {
            return Ok(());
        }

        self.flush().await
    }

    /// Tears down sockets opened by a reconnect that raced with `close()`.
    async fn abandon_if_closed(&self) -> bool {
        if !self.closed.load(Ordering::SeqCst) {
            return false;
        }
        tracing::debug!("Connection to {} closed during reconnect", self.address);
        self.close_sockets().await;
        self.reconnecting.store(false, Ordering::SeqCst);
        true
    }

    /// Writes queued messages in FIFO order, then opens the connection.
    async fn flush(&self) -> Result<(), ClientError> {
        let mut flushed = 0usize;
        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.pop_front() {
                    Some(outgoing) => outgoing,
                    None => {
                        if !self.closed.load(Ordering::SeqCst) {
                            *self.state.lock() = ConnectionState::Open;
                        }
                        self.reconnecting.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            };

            if let Err((outgoing, err)) = self.write(next).await {
                self.queue.lock().push_front(outgoing);
                return Err(err);
            }
            flushed += 1;
        }

        tracing::info!(
            "Reconnected to {}, flushed {} queued request(s)",
            self.address,
            flushed
        );
        Ok(())
    }

    fn give_up(&self) {
        let drained: Vec<Outgoing> = {
            let mut queue = self.queue.lock();
            *self.state.lock() = ConnectionState::Closed;
            self.reconnecting.store(false, Ordering::SeqCst);
            queue.drain(..).collect()
        };

        tracing::warn!(
            "Giving up on {} after {} attempt(s), failing {} queued request(s)",
            self.address,
            self.options.max_reconnect_attempts,
            drained.len()
        );
        fail_outgoing(drained, || ClientError::NotConnected);
        self.pending.fail_all(|| ClientError::NotConnected);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for slot in &mut self.sockets {
            if let Some(reader) = slot.reader.get_mut().take() {
                reader.abort();
            }
        }
    }
}

fn fail_outgoing(drained: Vec<Outgoing>, make_err: impl Fn() -> ClientError) {
    for outgoing in drained {
        if let Some(tx) = outgoing.reply {
            let _ = tx.send(Err(make_err()));
        }
    }
}

/// Reads one socket until it fails, delivering each reassembled reply.
async fn read_loop(shared: Weak<Shared>, mut reader: OwnedReadHalf, index: usize, generation: u64) {
    let mut framer = MessageBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Socket {} closed by peer", index);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Socket {} read failed: {}", index, e);
                break;
            }
        };

        let Some(shared) = shared.upgrade() else {
            return;
        };
        match framer.push(&buf[..n]) {
            Ok(messages) => {
                for message in messages {
                    shared.deliver(&message);
                }
            }
            Err(e) => {
                tracing::warn!("Framing error on socket {} to {}: {}", index, shared.address, e);
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.on_disconnect(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsonwire_bson::doc;
    use bsonwire_protocol::{Namespace, Request};
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, ServerAddress) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ServerAddress::new("127.0.0.1", port))
    }

    /// Accepts one socket and answers every query with `{ok: 1, echo: <request id>}`.
    async fn serve_one(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut framer = MessageBuffer::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            for message in framer.push(&buf[..n]).unwrap() {
                let request = Request::decode(&message).unwrap();
                let id = request.request_id();
                if let Request::Query(_) = request {
                    let reply = Reply::new(id, vec![doc! { "ok" => 1.0, "echo" => id }]);
                    stream.write_all(&reply.encode().unwrap()).await.unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn test_request_matches_reply() {
        let (listener, address) = listener().await;
        tokio::spawn(serve_one(listener));

        let conn = Connection::connect(address, ClientOptions::default()).await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.pool_size(), 1);

        let query = Query::command("admin", doc! { "ping" => 1 });
        let reply = conn.request(&query, Dispatch::RoundRobin).await.unwrap();
        assert_eq!(reply.response_to, query.request_id);
        assert_eq!(
            reply.documents[0].get_i32("echo"),
            Some(query.request_id)
        );
        assert_eq!(conn.pending_count(), 0);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (listener, address) = listener().await;
        tokio::spawn(serve_one(listener));

        let conn = Connection::connect(address, ClientOptions::default()).await.unwrap();
        conn.close().await;

        let query = Query::new(Namespace::new("db", "c"), doc! {});
        assert!(matches!(
            conn.request(&query, Dispatch::RoundRobin).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, address) = listener().await;
        drop(listener);

        let options = ClientOptions::default().with_auto_reconnect(false);
        let err = Connection::connect(address, options).await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[tokio::test]
    async fn test_drop_without_auto_reconnect_closes() {
        let (listener, address) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let options = ClientOptions::default().with_auto_reconnect(false);
        let conn = Connection::connect(address, options).await.unwrap();
        server.await.unwrap();

        for _ in 0..100 {
            if conn.state() == ConnectionState::Closed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(conn.state(), ConnectionState::Closed);

        let query = Query::new(Namespace::new("db", "c"), doc! {});
        assert!(matches!(
            conn.send(&query, Dispatch::RoundRobin).await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(conn.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_after_close_releases_sockets() {
        let (listener, address) = listener().await;
        let (reopened_tx, reopened_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (_first, _) = listener.accept().await.unwrap();
            let (second, _) = listener.accept().await.unwrap();
            let _ = reopened_tx.send(second);
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let conn = Connection::connect(address, ClientOptions::default()).await.unwrap();
        conn.close().await;

        // A reconnect that was already past its backoff when close() ran.
        conn.shared.restore().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.shared.sockets[0].writer.lock().await.is_none());
        assert!(conn.shared.sockets[0].reader.lock().is_none());

        let mut second = reopened_rx.await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(std::time::Duration::from_secs(2), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_checkout_round_robin() {
        let (listener, address) = listener().await;
        tokio::spawn(async move {
            let mut held = Vec::new();
            for _ in 0..3 {
                held.push(listener.accept().await.unwrap());
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let conn = Connection::connect(address, ClientOptions::default().with_pool_size(3))
            .await
            .unwrap();
        let picks: Vec<usize> = (0..6).map(|_| conn.checkout()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }
}
