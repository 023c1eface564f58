//! redis-mux is the connection core of a multiplexing Redis client. It owns the
//! connections to every node of a deployment, decides where each command goes, and
//! parks commands that failed on a broken connection until they can be resent.
//!
//! The crate is called `redis-mux` and you can depend on it via cargo:
//!
//! ```ini
//! [dependencies.redis-mux]
//! version = "*"
//! ```
//!
//! # Basic Operation
//!
//! The crate does not speak to sockets itself. Connections are opened through a
//! [`Transport`], which owns socket setup, TLS and the protocol codec, and hands back
//! [`Connection`]s that can write messages and report failures.
//!
//! A [`Multiplexer`] is created over a transport and connected once with
//! [`ConfigurationOptions`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! async fn do_something(transport: Arc<dyn redis_mux::Transport>) -> redis_mux::RedisResult<()> {
//!     let options = redis_mux::ConfigurationOptions::new()
//!         .add_endpoint("cache-1:6379".parse()?)
//!         .add_endpoint("cache-2:6379".parse()?)
//!         .set_client_name("billing");
//!     let mux = redis_mux::Multiplexer::connect_with(options, transport).await?;
//!
//!     let db = mux.database(0);
//!     db.execute(redis_mux::cmd("SET").arg("my_key").arg(42).clone()).await?;
//!     let value = db.execute(redis_mux::cmd("GET").arg("my_key").clone()).await?;
//!     mux.dispose_async().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Destinations
//!
//! Commands are executed through a [`DestinationContext`]: a database index, a set of
//! [`CommandFlags`], and the [`Destination`] the multiplexer picked when the context was
//! derived. With no endpoints every command fails immediately; with a single connected
//! node commands go straight to its interactive connection; otherwise every command is
//! routed by hash slot and replica preference.
//!
//! ## Retries
//!
//! A command that fails because its connection broke is queued if the [`RetryPolicy`]
//! allows it, and resent once its node is available again. Queued commands fail with a
//! timeout error once they are older than the async timeout.
//!
//! ## Blocking callers
//!
//! [`Multiplexer::wait`] and friends run an operation on the multiplexer's runtime and
//! block the calling thread until it completes or the sync timeout passes.
//!
//! ## Events
//!
//! Connection failures and restorations are published to the [`EventSender`] set with
//! [`ConfigurationOptions::set_event_sender`].

#![deny(non_camel_case_types)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, warn(rustdoc::broken_intra_doc_links))]

pub use crate::cmd::{cmd, Cmd, ToRedisArg};
pub use crate::config::ConfigurationOptions;
pub use crate::connection::{
    Connection, ConnectionHandle, ConnectionSlot, ConnectionState, ErrorSink, Handshake,
    NoHandshake, ServerInfo, ServerRole, SlotSettings, StandardHandshake, Transport,
};
pub use crate::context::{CommandFlags, DestinationContext};
pub use crate::endpoint::{
    normalize_endpoints, Endpoint, ServerType, DEFAULT_PORT, DEFAULT_SENTINEL_PORT,
    DEFAULT_TLS_PORT, LOOPBACK,
};
pub use crate::errors::{
    ConnectionFailureType, ErrorKind, RedisError, RetryMethod, ServerError, ServerErrorKind,
};
pub use crate::events::{
    ConnectionEvent, ConnectionFailedEvent, ConnectionRestoredEvent, ConnectionType,
    EventSender, SendError,
};
pub use crate::log_sink::LogSink;
pub use crate::message::{CommandStatus, Message};
pub use crate::multiplexer::{Database, Destination, DestinationKind, Multiplexer};
pub use crate::node::Node;
pub use crate::retry::{FailedCommand, FailureReason, RetryHandler, RetryPolicy, RetryQueue};
pub use crate::routing::{get_slot, RoutingConnection};
pub use crate::types::{ProtocolVersion, RedisFuture, RedisResult, Value};

mod cmd;
mod config;
mod connection;
mod context;
mod endpoint;
mod errors;
mod events;
mod log_sink;
mod message;
mod multiplexer;
mod node;
mod retry;
mod routing;
mod types;
