//! Testing support
//!
//! This crate provides `MockTransport`, a [`Transport`] that opens in-memory
//! `MockConnection`s instead of sockets. Each endpoint can be told to accept, refuse or
//! hang connection attempts, and the replies of its connections are scripted by command
//! name. This is useful for driving the connection core through failures without
//! needing a Redis server.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use redis_mux::{Endpoint, Value};
//! use redis_mux_test::{MockReply, MockTransport};
//!
//! let transport = Arc::new(MockTransport::new());
//! let endpoint: Endpoint = "127.0.0.1:6379".parse().unwrap();
//! transport.reply(&endpoint, "GET", MockReply::Value(Value::Int(42)));
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::FutureExt;
use redis_mux::{
    Connection, Endpoint, ErrorKind, ErrorSink, Message, RedisError, RedisFuture, ServerError,
    ServerRole, Transport, Value,
};
use tokio_util::sync::CancellationToken;

/// How an endpoint answers connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Open a connection.
    #[default]
    Accept,
    /// Fail with `ECONNREFUSED`.
    Refuse,
    /// Never answer; the attempt ends when it is cancelled or times out.
    Hang,
}

/// A scripted reply of a `MockConnection`.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Reply with a value.
    Value(Value),
    /// Reply with a server error, given as the error line without the leading `-`.
    ServerError(String),
    /// Fail with an I/O error after the command was sent.
    IoError(io::ErrorKind),
    /// Fail with a broken pipe before the command reaches the wire.
    Unsent,
    /// Never reply; the write ends when the connection is disposed.
    Hang,
}

impl From<Value> for MockReply {
    fn from(value: Value) -> Self {
        MockReply::Value(value)
    }
}

#[derive(Default)]
struct EndpointScript {
    behavior: Behavior,
    role: Option<ServerRole>,
    queued: HashMap<String, VecDeque<MockReply>>,
    replies: HashMap<String, MockReply>,
    connections: Vec<MockConnection>,
    opens: usize,
}

impl EndpointScript {
    fn next_reply(&mut self, name: &str) -> Option<MockReply> {
        if let Some(reply) = self.queued.get_mut(name).and_then(VecDeque::pop_front) {
            return Some(reply);
        }
        self.replies.get(name).cloned()
    }

    fn builtin_reply(&self, name: &str) -> MockReply {
        let role = match self.role.unwrap_or(ServerRole::Primary) {
            ServerRole::Replica => "slave",
            _ => "master",
        };
        match name {
            "PING" => MockReply::Value(Value::SimpleString("PONG".to_string())),
            "ROLE" => MockReply::Value(Value::Array(vec![Value::BulkString(
                role.as_bytes().to_vec(),
            )])),
            "HELLO" => MockReply::Value(Value::Map(vec![
                (
                    Value::SimpleString("server".to_string()),
                    Value::SimpleString("redis".to_string()),
                ),
                (
                    Value::SimpleString("version".to_string()),
                    Value::SimpleString("7.2.4".to_string()),
                ),
                (Value::SimpleString("proto".to_string()), Value::Int(3)),
                (
                    Value::SimpleString("role".to_string()),
                    Value::SimpleString(role.to_string()),
                ),
            ])),
            _ => MockReply::Value(Value::Okay),
        }
    }
}

#[derive(Default)]
struct Shared {
    endpoints: Mutex<HashMap<Endpoint, EndpointScript>>,
    opens: AtomicUsize,
}

impl Shared {
    fn endpoints(&self) -> MutexGuard<'_, HashMap<Endpoint, EndpointScript>> {
        self.endpoints.lock().unwrap()
    }
}

/// A [`Transport`] opening in-memory connections.
///
/// Every endpoint accepts connections unless told otherwise. Replies are resolved per
/// endpoint: queued one-shot replies first, then persistent replies, then built-in
/// defaults (`PONG` for `PING`, the configured role for `ROLE` and `HELLO`, `OK` for
/// anything else).
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Creates a transport whose endpoints accept every connection.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_endpoint<T>(&self, endpoint: &Endpoint, f: impl FnOnce(&mut EndpointScript) -> T) -> T {
        let mut endpoints = self.shared.endpoints();
        f(endpoints.entry(endpoint.clone()).or_default())
    }

    /// Sets how `endpoint` answers future connection attempts.
    pub fn set_behavior(&self, endpoint: &Endpoint, behavior: Behavior) {
        self.with_endpoint(endpoint, |script| script.behavior = behavior);
    }

    /// Sets the role `endpoint` reports during the handshake.
    pub fn set_role(&self, endpoint: &Endpoint, role: ServerRole) {
        self.with_endpoint(endpoint, |script| script.role = Some(role));
    }

    /// Replies to every `name` command sent to `endpoint` with `reply`.
    pub fn reply(&self, endpoint: &Endpoint, name: &str, reply: impl Into<MockReply>) {
        let reply = reply.into();
        self.with_endpoint(endpoint, |script| {
            script.replies.insert(name.to_ascii_uppercase(), reply);
        });
    }

    /// Replies to the next `name` command sent to `endpoint` with `reply`. Queued replies
    /// are consumed in order, before the persistent reply.
    pub fn queue_reply(&self, endpoint: &Endpoint, name: &str, reply: impl Into<MockReply>) {
        let reply = reply.into();
        self.with_endpoint(endpoint, |script| {
            script
                .queued
                .entry(name.to_ascii_uppercase())
                .or_default()
                .push_back(reply);
        });
    }

    /// The number of connection attempts, successful or not, to any endpoint.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// The number of connection attempts to `endpoint`.
    pub fn opens_to(&self, endpoint: &Endpoint) -> usize {
        self.with_endpoint(endpoint, |script| script.opens)
    }

    /// Every connection opened to `endpoint`, oldest first.
    pub fn connections(&self, endpoint: &Endpoint) -> Vec<MockConnection> {
        self.with_endpoint(endpoint, |script| script.connections.clone())
    }

    /// The most recent connection opened to `endpoint`.
    pub fn last_connection(&self, endpoint: &Endpoint) -> Option<MockConnection> {
        self.with_endpoint(endpoint, |script| script.connections.last().cloned())
    }

    /// The names of the non-internal commands written to any connection of `endpoint`.
    pub fn commands(&self, endpoint: &Endpoint) -> Vec<String> {
        self.connections(endpoint)
            .iter()
            .flat_map(MockConnection::commands)
            .collect()
    }
}

impl Transport for MockTransport {
    fn open<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        cancel: CancellationToken,
    ) -> RedisFuture<'a, Box<dyn Connection>> {
        async move {
            self.shared.opens.fetch_add(1, Ordering::SeqCst);
            let behavior = self.with_endpoint(endpoint, |script| {
                script.opens += 1;
                script.behavior
            });
            match behavior {
                Behavior::Accept => {
                    let connection = MockConnection::new(endpoint.clone(), self.shared.clone());
                    self.with_endpoint(endpoint, |script| {
                        script.connections.push(connection.clone())
                    });
                    Ok(Box::new(connection) as Box<dyn Connection>)
                }
                Behavior::Refuse => Err(RedisError::from(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{endpoint} refused the connection"),
                ))),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(RedisError::from(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "connection attempt cancelled",
                    )))
                }
            }
        }
        .boxed()
    }
}

struct ConnectionState {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    closed: CancellationToken,
    broken: AtomicBool,
    writes: AtomicUsize,
    commands: Mutex<Vec<String>>,
    sink: Mutex<Option<ErrorSink>>,
}

/// An in-memory connection opened by `MockTransport`.
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct MockConnection(Arc<ConnectionState>);

impl MockConnection {
    fn new(endpoint: Endpoint, shared: Arc<Shared>) -> Self {
        Self(Arc::new(ConnectionState {
            endpoint,
            shared,
            closed: CancellationToken::new(),
            broken: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }))
    }

    /// The endpoint this connection was opened to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.0.endpoint
    }

    /// The number of writes, including handshake traffic.
    pub fn writes(&self) -> usize {
        self.0.writes.load(Ordering::SeqCst)
    }

    /// The names of the non-internal commands written, in order.
    pub fn commands(&self) -> Vec<String> {
        self.0.commands.lock().unwrap().clone()
    }

    /// True once the connection was disposed or broke.
    pub fn is_closed(&self) -> bool {
        self.0.closed.is_cancelled()
    }

    /// True if an error sink was registered.
    pub fn has_error_sink(&self) -> bool {
        self.0.sink.lock().unwrap().is_some()
    }

    /// Breaks the connection: pending and future writes fail, and `error` is reported to
    /// the registered error sink.
    pub fn fail(&self, error: RedisError) {
        self.0.broken.store(true, Ordering::SeqCst);
        self.0.closed.cancel();
        let sink = self.0.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.report(error);
        }
    }

    /// Breaks the connection with a connection reset.
    pub fn reset(&self) {
        self.fail(RedisError::from(io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    async fn reply(&self, message: &Message) -> Result<Value, RedisError> {
        let name = message.cmd().name().to_ascii_uppercase();
        let reply = {
            let mut endpoints = self.0.shared.endpoints();
            let script = endpoints.entry(self.0.endpoint.clone()).or_default();
            script
                .next_reply(&name)
                .unwrap_or_else(|| script.builtin_reply(&name))
        };

        if let MockReply::Unsent = reply {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        message.mark_sent();
        match reply {
            MockReply::Value(value) => Ok(value),
            MockReply::ServerError(line) => Err(ServerError::from_reply(&line).into()),
            MockReply::IoError(kind) => Err(io::Error::from(kind).into()),
            MockReply::Unsent | MockReply::Hang => {
                self.0.closed.cancelled().await;
                Err(io::Error::from(io::ErrorKind::ConnectionAborted).into())
            }
        }
    }
}

impl Connection for MockConnection {
    fn write<'a>(&'a self, message: &'a Message) -> RedisFuture<'a, Value> {
        async move {
            self.0.writes.fetch_add(1, Ordering::SeqCst);
            if self.0.broken.load(Ordering::SeqCst) || self.is_closed() {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }
            if !message.is_internal_call() {
                self.0.commands.lock().unwrap().push(message.cmd().name());
            }
            self.reply(message).await
        }
        .boxed()
    }

    fn dispose(&self) {
        log::trace!("Mock connection to {} disposed", self.0.endpoint);
        self.0.closed.cancel();
    }

    fn subscribe_errors(&self, sink: ErrorSink) {
        *self.0.sink.lock().unwrap() = Some(sink);
    }
}

/// Shorthand for an error of `kind` with a static description.
pub fn error(kind: ErrorKind, description: &'static str) -> RedisError {
    RedisError::from((kind, description))
}
