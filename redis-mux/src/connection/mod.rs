//! The boundary to the transport layer, and the connection slots built on top of it.
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::errors::{ErrorKind, RedisError};
use crate::message::Message;
use crate::types::{RedisFuture, Value};

mod handshake;
mod slot;

pub use handshake::{Handshake, NoHandshake, ServerInfo, ServerRole, StandardHandshake};
pub use slot::{ConnectionSlot, ConnectionState, ErrorSink, SlotSettings};

/// Opens connections to endpoints.
///
/// Implementations own socket setup, TLS and the protocol codec. The returned connection
/// must be ready to write messages.
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection to `endpoint`. The attempt should stop once `cancel` fires.
    fn open<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        cancel: CancellationToken,
    ) -> RedisFuture<'a, Box<dyn Connection>>;
}

/// An open, duplex connection to a single server.
pub trait Connection: Send + Sync + 'static {
    /// Writes a message and resolves to its reply.
    ///
    /// Implementations call [`Message::mark_sent`] before the first byte reaches the wire.
    fn write<'a>(&'a self, message: &'a Message) -> RedisFuture<'a, Value>;

    /// Closes the connection. Pending and future writes fail.
    fn dispose(&self);

    /// Closes the connection, waiting for the transport to shut down.
    fn dispose_async(&self) -> BoxFuture<'_, ()> {
        self.dispose();
        future::ready(()).boxed()
    }

    /// Registers the sink runtime failures of this connection are reported to.
    /// A connection reports to at most one sink; a later call replaces the earlier one.
    fn subscribe_errors(&self, sink: ErrorSink);
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// The unit a [`ConnectionSlot`] swaps atomically: one open connection, or the inert
/// null connection whose writes fail with [`ErrorKind::NoConnectionAvailable`].
pub struct ConnectionHandle {
    id: u64,
    connection: Option<Box<dyn Connection>>,
    disposed: AtomicBool,
}

impl ConnectionHandle {
    pub(crate) fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            connection: Some(connection),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn null() -> Self {
        Self {
            id: 0,
            connection: None,
            disposed: AtomicBool::new(true),
        }
    }

    /// A process-unique identifier of the wrapped connection. The null connection is `0`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True for the inert null connection.
    pub fn is_null(&self) -> bool {
        self.connection.is_none()
    }

    /// True once the handle was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Writes a message through the wrapped connection.
    pub fn write<'a>(&'a self, message: &'a Message) -> RedisFuture<'a, Value> {
        match &self.connection {
            Some(_) if self.is_disposed() => {
                future::ready(Err(crate::errors::closed_connection_error())).boxed()
            }
            Some(connection) => connection.write(message),
            None => future::ready(Err(RedisError::from((
                ErrorKind::NoConnectionAvailable,
                "No connection is available",
            ))))
            .boxed(),
        }
    }

    pub(crate) fn subscribe_errors(&self, sink: ErrorSink) {
        if let Some(connection) = &self.connection {
            connection.subscribe_errors(sink);
        }
    }

    /// Disposes the wrapped connection. Only the first call reaches the connection.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(connection) = &self.connection {
            connection.dispose();
        }
    }

    pub(crate) async fn dispose_async(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(connection) = &self.connection {
            connection.dispose_async().await;
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("null", &self.is_null())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::cmd;
    use crate::context::CommandFlags;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);

    impl Connection for Counting {
        fn write<'a>(&'a self, message: &'a Message) -> RedisFuture<'a, Value> {
            message.mark_sent();
            future::ready(Ok(Value::Okay)).boxed()
        }

        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn subscribe_errors(&self, _sink: ErrorSink) {}
    }

    #[tokio::test]
    async fn null_connection_rejects_writes() {
        let handle = ConnectionHandle::null();
        let message = Message::new(cmd("PING"), 0, CommandFlags::empty());
        let err = handle.write(&message).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoConnectionAvailable);
        assert!(!message.is_sent());
    }

    #[tokio::test]
    async fn dispose_reaches_connection_once() {
        let disposals = Arc::new(AtomicUsize::new(0));
        let handle = ConnectionHandle::new(Box::new(Counting(disposals.clone())));
        let message = Message::new(cmd("PING"), 0, CommandFlags::empty());
        assert_eq!(handle.write(&message).await.unwrap(), Value::Okay);

        handle.dispose();
        handle.dispose();
        handle.dispose_async().await;
        assert_eq!(disposals.load(Ordering::SeqCst), 1);

        let err = handle.write(&message).await.unwrap_err();
        assert!(err.is_connection_dropped());
    }
}
