use std::{error, fmt, io};

use arcstr::ArcStr;

use crate::errors::server_error::{ServerError, ServerErrorKind};

/// Classification of a failed connection attempt, or of a live connection that broke.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ConnectionFailureType {
    /// The transport could not be established to the endpoint.
    UnableToConnect,
    /// The transport was established, but failed while it was in use.
    SocketFailure,
    /// The connection was torn down by its owner.
    ConnectionDisposed,
    /// The server rejected the credentials offered during the handshake.
    AuthenticationFailure,
    /// Any other failure, usually a bug.
    InternalFailure,
}

impl fmt::Display for ConnectionFailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionFailureType::UnableToConnect => "unable to connect",
            ConnectionFailureType::SocketFailure => "socket failure",
            ConnectionFailureType::ConnectionDisposed => "connection disposed",
            ConnectionFailureType::AuthenticationFailure => "authentication failure",
            ConnectionFailureType::InternalFailure => "internal failure",
        })
    }
}

/// An enum of all error kinds.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport failed to decode a server response.
    ProtocolError,
    /// The authentication with the server failed.
    AuthenticationFailed,
    /// Operation failed because of a type mismatch.
    UnexpectedReturnType,
    /// An error that was caused because the parameter to the
    /// client were wrong.
    InvalidClientConfig,
    /// This kind is returned if the redis error is one that is
    /// not native to the system.  This is usually the case if
    /// the cause is another error.
    IoError,
    /// An error raised that was identified on the client before execution.
    ClientError,
    /// An extension error.  This is an error created by the server
    /// that is not directly understood by the library.
    ExtensionError,
    /// Establishing or keeping a connection failed.
    ConnectionFailure(ConnectionFailureType),
    /// The operation did not complete within its configured timeout.
    Timeout,
    /// No connection is currently able to service the operation.
    NoConnectionAvailable,
    /// The multiplexer has no endpoints at all, and will never be able to service the operation.
    Unreachable,
    /// An error returned from the server
    ServerError(ServerErrorKind),
}

/// Represents a redis error.
///
/// For the most part you should be using the Error trait to interact with this
/// rather than the actual struct.
pub struct RedisError {
    repr: ErrorRepr,
}

#[derive(Debug)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, ArcStr),
    IoError(io::Error),
    ServerError(ServerError),
}

impl PartialEq for RedisError {
    fn eq(&self, other: &RedisError) -> bool {
        match (&self.repr, &other.repr) {
            (&ErrorRepr::WithDescription(kind_a, _), &ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                &ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                &ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::ServerError(a), ErrorRepr::ServerError(b)) => *a == *b,
            _ => false,
        }
    }
}

impl From<io::Error> for RedisError {
    fn from(err: io::Error) -> RedisError {
        RedisError {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<(ErrorKind, &'static str)> for RedisError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> RedisError {
        RedisError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for RedisError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> RedisError {
        RedisError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail.into()),
        }
    }
}

impl From<ServerError> for RedisError {
    fn from(err: ServerError) -> Self {
        Self {
            repr: ErrorRepr::ServerError(err),
        }
    }
}

impl From<ServerErrorKind> for ErrorKind {
    fn from(kind: ServerErrorKind) -> Self {
        ErrorKind::ServerError(kind)
    }
}

impl From<ConnectionFailureType> for ErrorKind {
    fn from(failure: ConnectionFailureType) -> Self {
        ErrorKind::ConnectionFailure(failure)
    }
}

impl error::Error for RedisError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::IoError(err) => Some(err),
            ErrorRepr::ServerError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, detail) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                detail.fmt(f)
            }
            ErrorRepr::IoError(err) => err.fmt(f),
            ErrorRepr::ServerError(err) => err.fmt(f),
        }
    }
}

/// What method should be used if retrying this request.
#[non_exhaustive]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RetryMethod {
    /// Create a fresh connection, since the current connection is no longer usable.
    Reconnect,
    /// Don't retry, this is a permanent error.
    NoRetry,
    /// Retry immediately, this doesn't require a wait.
    RetryImmediately,
    /// Retry after sleeping to avoid overloading the external service.
    WaitAndRetry,
    /// The key has moved to a different node but we have to ask which node, this is only relevant for clusters.
    AskRedirect,
    /// The key has moved to a different node, this is only relevant for clusters.
    MovedRedirect,
}

impl RedisError {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => *kind,
            ErrorRepr::IoError(_) => ErrorKind::IoError,
            ErrorRepr::ServerError(err) => match err.kind() {
                Some(kind) => ErrorKind::ServerError(kind),
                None => ErrorKind::ExtensionError,
            },
        }
    }

    /// Returns the error detail.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, detail) => Some(detail.as_str()),
            ErrorRepr::ServerError(err) => err.details(),
            _ => None,
        }
    }

    /// Returns the raw error code if available.
    pub fn code(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::ServerError(err) => Some(err.code()),
            _ => None,
        }
    }

    /// Returns the connection failure classification, if this error describes one.
    pub fn connection_failure(&self) -> Option<ConnectionFailureType> {
        match self.kind() {
            ErrorKind::ConnectionFailure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns the name of the error category for display purposes.
    pub fn category(&self) -> &str {
        match self.kind() {
            ErrorKind::ServerError(ServerErrorKind::ResponseError) => "response error",
            ErrorKind::AuthenticationFailed => "authentication failed",
            ErrorKind::UnexpectedReturnType => "type error",
            ErrorKind::ServerError(ServerErrorKind::ExecAbort) => "script execution aborted",
            ErrorKind::ServerError(ServerErrorKind::BusyLoading) => "busy loading",
            ErrorKind::ServerError(ServerErrorKind::NoScript) => "no script",
            ErrorKind::InvalidClientConfig => "invalid client config",
            ErrorKind::ServerError(ServerErrorKind::Moved) => "key moved",
            ErrorKind::ServerError(ServerErrorKind::Ask) => "key moved (ask)",
            ErrorKind::ServerError(ServerErrorKind::TryAgain) => "try again",
            ErrorKind::ServerError(ServerErrorKind::ClusterDown) => "cluster down",
            ErrorKind::ServerError(ServerErrorKind::CrossSlot) => "cross-slot",
            ErrorKind::ServerError(ServerErrorKind::MasterDown) => "master down",
            ErrorKind::ServerError(ServerErrorKind::ReadOnly) => "read-only",
            ErrorKind::ServerError(ServerErrorKind::NoAuth) => "authentication required",
            ErrorKind::ServerError(ServerErrorKind::NoPerm) => "no permission",
            ErrorKind::IoError => "I/O error",
            ErrorKind::ExtensionError => "extension error",
            ErrorKind::ClientError => "client error",
            ErrorKind::ProtocolError => "protocol error",
            ErrorKind::ConnectionFailure(_) => "connection failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NoConnectionAvailable => "no connection available",
            ErrorKind::Unreachable => "unreachable",
        }
    }

    /// Indicates that this failure is an IO failure.
    pub fn is_io_error(&self) -> bool {
        self.kind() == ErrorKind::IoError
    }

    /// Returns true if this error indicates that the connection was
    /// refused.
    pub fn is_connection_refusal(&self) -> bool {
        match self.repr {
            ErrorRepr::IoError(ref err) => err.kind() == io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Returns true if error was caused by a timeout, either an I/O time out
    /// or an operation that exceeded its configured deadline.
    pub fn is_timeout(&self) -> bool {
        match self.repr {
            ErrorRepr::IoError(ref err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => self.kind() == ErrorKind::Timeout,
        }
    }

    /// Returns true if error was caused by a dropped connection.
    pub fn is_connection_dropped(&self) -> bool {
        match self.repr {
            ErrorRepr::IoError(ref err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => matches!(
                self.kind(),
                ErrorKind::ConnectionFailure(ConnectionFailureType::SocketFailure)
                    | ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed)
            ),
        }
    }

    /// Returns true if the error is likely to not be recoverable, and the connection must be replaced.
    pub fn is_unrecoverable_error(&self) -> bool {
        self.retry_method() == RetryMethod::Reconnect
    }

    /// Returns true if the error is a transient connection, transport or protocol failure.
    ///
    /// Only errors of these kinds can send a command to the retry queue. Server replies,
    /// authentication failures and client-side errors never qualify.
    pub fn is_retry_eligible_kind(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::IoError
                | ErrorKind::ConnectionFailure(_)
                | ErrorKind::Timeout
                | ErrorKind::NoConnectionAvailable
                | ErrorKind::ProtocolError
        )
    }

    /// Returns the node the error refers to.
    ///
    /// This returns `(addr, slot_id)`.
    pub fn redirect_node(&self) -> Option<(&str, u16)> {
        match self.kind() {
            ErrorKind::ServerError(ServerErrorKind::Ask)
            | ErrorKind::ServerError(ServerErrorKind::Moved) => (),
            _ => return None,
        }
        let mut iter = self.detail()?.split_ascii_whitespace();
        let slot_id: u16 = iter.next()?.parse().ok()?;
        let addr = iter.next()?;
        Some((addr, slot_id))
    }

    /// Clone the `RedisError`, throwing away non-cloneable parts of an `IoError`.
    ///
    /// Deriving `Clone` is not possible because the wrapped `io::Error` is not
    /// cloneable.
    ///
    /// The `ioerror_description` parameter will be prepended to the message in
    /// case an `IoError` is found.
    pub fn clone_mostly(&self, ioerror_description: &'static str) -> Self {
        let repr = match &self.repr {
            ErrorRepr::WithDescription(kind, desc) => ErrorRepr::WithDescription(*kind, desc),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                ErrorRepr::WithDescriptionAndDetail(*kind, desc, detail.clone())
            }
            ErrorRepr::IoError(ref e) => ErrorRepr::IoError(io::Error::new(
                e.kind(),
                format!("{ioerror_description}: {e}"),
            )),
            ErrorRepr::ServerError(server_error) => ErrorRepr::ServerError(server_error.clone()),
        };
        Self { repr }
    }

    /// Specifies what method (if any) should be used to retry this request.
    ///
    /// This isn't precise, and internally the library uses multiple other considerations rather
    /// than just the error kind on when to retry.
    pub fn retry_method(&self) -> RetryMethod {
        match self.kind() {
            ErrorKind::ServerError(kind) => kind.retry_method(),

            ErrorKind::ExtensionError => RetryMethod::NoRetry,
            ErrorKind::UnexpectedReturnType => RetryMethod::NoRetry,
            ErrorKind::InvalidClientConfig => RetryMethod::NoRetry,
            ErrorKind::ClientError => RetryMethod::NoRetry,
            ErrorKind::Unreachable => RetryMethod::NoRetry,
            ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed) => {
                RetryMethod::NoRetry
            }

            ErrorKind::ProtocolError => RetryMethod::Reconnect,
            ErrorKind::AuthenticationFailed => RetryMethod::Reconnect,
            ErrorKind::ConnectionFailure(_) => RetryMethod::Reconnect,

            ErrorKind::Timeout => RetryMethod::WaitAndRetry,
            ErrorKind::NoConnectionAvailable => RetryMethod::WaitAndRetry,

            ErrorKind::IoError => match &self.repr {
                ErrorRepr::IoError(err) => match err.kind() {
                    io::ErrorKind::ConnectionRefused => RetryMethod::Reconnect,
                    io::ErrorKind::NotFound => RetryMethod::Reconnect,
                    io::ErrorKind::ConnectionReset => RetryMethod::Reconnect,
                    io::ErrorKind::ConnectionAborted => RetryMethod::Reconnect,
                    io::ErrorKind::NotConnected => RetryMethod::Reconnect,
                    io::ErrorKind::BrokenPipe => RetryMethod::Reconnect,
                    io::ErrorKind::UnexpectedEof => RetryMethod::Reconnect,

                    io::ErrorKind::PermissionDenied => RetryMethod::NoRetry,
                    io::ErrorKind::Unsupported => RetryMethod::NoRetry,

                    _ => RetryMethod::RetryImmediately,
                },
                _ => RetryMethod::RetryImmediately,
            },
        }
    }
}

pub(crate) fn closed_connection_error() -> RedisError {
    RedisError::from((
        ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed),
        "Connection has been disposed",
    ))
}
