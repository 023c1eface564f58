use std::fmt;

use crate::connection::ConnectionSlot;
use crate::errors::{ConnectionFailureType, ErrorKind, RedisError};
use crate::message::Message;
use crate::routing::RoutingConnection;
use crate::types::{RedisResult, Value};

/// The addressing strategy of a [`DestinationContext`](crate::DestinationContext).
pub enum Destination {
    /// No endpoints at all; every command fails immediately.
    Unreachable,
    /// A single connected node, addressed through its interactive slot.
    Direct(ConnectionSlot),
    /// Several nodes, or a single one that isn't connected; every command is routed.
    Routed(RoutingConnection),
    /// The multiplexer was disposed.
    Disposed,
}

/// The variant of a [`Destination`], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    /// See [`Destination::Unreachable`].
    Unreachable,
    /// See [`Destination::Direct`].
    Direct,
    /// See [`Destination::Routed`].
    Routed,
    /// See [`Destination::Disposed`].
    Disposed,
}

fn unreachable_error() -> RedisError {
    RedisError::from((
        ErrorKind::Unreachable,
        "No endpoints are configured, the command cannot be sent",
    ))
}

fn disposed_error() -> RedisError {
    RedisError::from((
        ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed),
        "The multiplexer was disposed",
    ))
}

impl Destination {
    /// The variant of this destination.
    pub fn kind(&self) -> DestinationKind {
        match self {
            Destination::Unreachable => DestinationKind::Unreachable,
            Destination::Direct(_) => DestinationKind::Direct,
            Destination::Routed(_) => DestinationKind::Routed,
            Destination::Disposed => DestinationKind::Disposed,
        }
    }

    /// The slot a direct destination writes to.
    pub fn as_direct(&self) -> Option<&ConnectionSlot> {
        match self {
            Destination::Direct(slot) => Some(slot),
            _ => None,
        }
    }

    /// Writes `message` and resolves to its reply.
    pub async fn write(&self, message: &Message) -> RedisResult<Value> {
        match self {
            Destination::Unreachable => Err(unreachable_error()),
            Destination::Disposed => Err(disposed_error()),
            Destination::Direct(slot) => slot.write(message).await,
            Destination::Routed(routing) => routing.write(message).await,
        }
    }

    /// Whether `message` could be written right now.
    ///
    /// Unreachable and disposed destinations never will be, and report it as an error.
    pub fn is_available(&self, message: &Message) -> RedisResult<bool> {
        match self {
            Destination::Unreachable => Err(unreachable_error()),
            Destination::Disposed => Err(disposed_error()),
            Destination::Direct(slot) => Ok(slot.is_connected()),
            Destination::Routed(routing) => Ok(routing.select(message).is_ok()),
        }
    }

    /// True if replacing `self` with `other` would not change where commands go.
    pub(crate) fn same_target(&self, other: &Destination) -> bool {
        match (self, other) {
            (Destination::Direct(a), Destination::Direct(b)) => a.ptr_eq(b),
            (Destination::Disposed, _) => true,
            (a, b) => a.kind() == b.kind(),
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Direct(slot) => f.debug_tuple("Direct").field(&slot.label()).finish(),
            Destination::Routed(routing) => f.debug_tuple("Routed").field(routing).finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::cmd;
    use crate::context::CommandFlags;

    #[tokio::test]
    async fn unreachable_fails_fast() {
        let message = Message::new(cmd("GET").arg("foo").clone(), 0, CommandFlags::empty());
        let err = Destination::Unreachable.write(&message).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert!(!message.is_sent());
        assert!(Destination::Unreachable.is_available(&message).is_err());
    }

    #[tokio::test]
    async fn disposed_reports_disposal() {
        let message = Message::new(cmd("PING"), 0, CommandFlags::empty());
        let err = Destination::Disposed.write(&message).await.unwrap_err();
        assert_eq!(
            err.connection_failure(),
            Some(ConnectionFailureType::ConnectionDisposed)
        );
    }

    #[test]
    fn disposed_is_never_replaced() {
        assert!(Destination::Disposed.same_target(&Destination::Unreachable));
        assert!(!Destination::Unreachable.same_target(&Destination::Disposed));
    }
}
