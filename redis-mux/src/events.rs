//! Connection failure and restoration notifications.
use std::fmt;

use crate::endpoint::Endpoint;
use crate::errors::{ConnectionFailureType, RedisError};

/// The traffic a connection slot carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Ordinary request/response traffic.
    Interactive,
    /// Publish/subscribe traffic.
    Subscription,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionType::Interactive => "interactive",
            ConnectionType::Subscription => "subscription",
        })
    }
}

/// A connection failed to open, broke while in use, or was disposed.
#[derive(Debug)]
pub struct ConnectionFailedEvent {
    /// The endpoint of the failed connection.
    pub endpoint: Endpoint,
    /// The slot the connection belonged to.
    pub connection_type: ConnectionType,
    /// What went wrong.
    pub failure_type: ConnectionFailureType,
    /// The underlying error.
    pub error: RedisError,
}

impl Clone for ConnectionFailedEvent {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            connection_type: self.connection_type,
            failure_type: self.failure_type,
            error: self.error.clone_mostly("connection failed"),
        }
    }
}

/// A connection that had faulted was re-established.
#[derive(Debug, Clone)]
pub struct ConnectionRestoredEvent {
    /// The endpoint of the restored connection.
    pub endpoint: Endpoint,
    /// The slot the connection belongs to.
    pub connection_type: ConnectionType,
}

/// A notification about the health of a connection slot.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// See [`ConnectionFailedEvent`].
    Failed(ConnectionFailedEvent),
    /// See [`ConnectionRestoredEvent`].
    Restored(ConnectionRestoredEvent),
}

impl ConnectionEvent {
    /// The endpoint the event is about.
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            ConnectionEvent::Failed(event) => &event.endpoint,
            ConnectionEvent::Restored(event) => &event.endpoint,
        }
    }

    /// The slot the event is about.
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            ConnectionEvent::Failed(event) => event.connection_type,
            ConnectionEvent::Restored(event) => event.connection_type,
        }
    }
}

/// An error showing that the receiver of events is gone.
#[derive(Debug)]
pub struct SendError;

/// A trait for sender parts of a channel that can be used for receiving connection events.
pub trait EventSender: Send + Sync + 'static {
    /// The sender must send without blocking, otherwise it will block the multiplexer's event loop.
    /// Should error when the receiver was closed, and sending events is no longer viable.
    fn send(&self, event: ConnectionEvent) -> Result<(), SendError>;
}

impl EventSender for tokio::sync::mpsc::UnboundedSender<ConnectionEvent> {
    fn send(&self, event: ConnectionEvent) -> Result<(), SendError> {
        match self.send(event) {
            Ok(_) => Ok(()),
            Err(_) => Err(SendError),
        }
    }
}

impl EventSender for tokio::sync::broadcast::Sender<ConnectionEvent> {
    fn send(&self, event: ConnectionEvent) -> Result<(), SendError> {
        match self.send(event) {
            Ok(_) => Ok(()),
            Err(_) => Err(SendError),
        }
    }
}

impl EventSender for std::sync::mpsc::Sender<ConnectionEvent> {
    fn send(&self, event: ConnectionEvent) -> Result<(), SendError> {
        match self.send(event) {
            Ok(_) => Ok(()),
            Err(_) => Err(SendError),
        }
    }
}

impl<T, Func: Fn(ConnectionEvent) -> Result<(), T> + Send + Sync + 'static> EventSender for Func {
    fn send(&self, event: ConnectionEvent) -> Result<(), SendError> {
        match self(event) {
            Ok(_) => Ok(()),
            Err(_) => Err(SendError),
        }
    }
}

impl<T> EventSender for std::sync::Arc<T>
where
    T: EventSender,
{
    fn send(&self, event: ConnectionEvent) -> Result<(), SendError> {
        self.as_ref().send(event)
    }
}
