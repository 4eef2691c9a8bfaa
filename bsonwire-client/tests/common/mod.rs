//! In-process server speaking the legacy wire protocol.

#![allow(dead_code)]

use bsonwire_bson::{doc, Document, Value};
use bsonwire_client::ServerAddress;
use bsonwire_protocol::{MessageBuffer, Reply, Request};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Builds the reply to a request, or `None` for messages that get no reply.
pub type Handler = Arc<dyn Fn(&Request) -> Option<Reply> + Send + Sync>;

pub struct MockServer {
    pub address: ServerAddress,
    pub received: mpsc::UnboundedReceiver<Request>,
    accept: JoinHandle<()>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockServer {
    pub async fn start(handler: Handler) -> Self {
        Self::start_on(0, handler).await
    }

    pub async fn start_on(port: u16, handler: Handler) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, received) = mpsc::unbounded_channel();
        let sessions: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_sessions = Arc::clone(&sessions);
        let accept = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let session = tokio::spawn(serve(stream, Arc::clone(&handler), tx.clone()));
                accept_sessions.lock().push(session);
            }
        });

        Self {
            address: ServerAddress::new("127.0.0.1", port),
            received,
            accept,
            sessions,
        }
    }

    /// Stops listening and drops every accepted socket.
    pub fn shutdown(&self) {
        self.accept.abort();
        for session in self.sessions.lock().drain(..) {
            session.abort();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Next request the server saw, waiting up to two seconds.
    pub async fn next_request(&mut self) -> Request {
        tokio::time::timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("no request within two seconds")
            .expect("server channel closed")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(mut stream: TcpStream, handler: Handler, tx: mpsc::UnboundedSender<Request>) {
    let mut framer = MessageBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let Ok(messages) = framer.push(&buf[..n]) else {
            return;
        };
        for message in messages {
            let request = Request::decode(&message).expect("client sent a malformed message");
            let reply = handler(&request);
            let _ = tx.send(request);
            if let Some(reply) = reply {
                let bytes = reply.encode().unwrap();
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// The command name and document of a `$cmd` query.
pub fn command(request: &Request) -> Option<(&str, &Document)> {
    match request {
        Request::Query(query) if query.namespace.is_command() => {
            Some((query.query.first_key()?, &query.query))
        }
        _ => None,
    }
}

pub fn ok_reply(request: &Request, mut fields: Document) -> Reply {
    fields.insert("ok", 1.0);
    Reply::new(request.request_id(), vec![fields])
}

/// Answers `isMaster` as a standalone primary and any other command with `ok: 1`.
pub fn standalone(request: &Request) -> Option<Reply> {
    match command(request) {
        Some(("ismaster", _)) => Some(ok_reply(request, doc! { "ismaster" => true })),
        Some(_) => Some(ok_reply(request, doc! {})),
        None => None,
    }
}

pub fn member_list(hosts: &[&ServerAddress]) -> Vec<Value> {
    hosts.iter().map(|host| Value::from(host.to_string())).collect()
}

/// Polls `check` every 10ms for up to two seconds.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
