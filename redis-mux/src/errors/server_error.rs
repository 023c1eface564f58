use arcstr::ArcStr;
use std::fmt;

use crate::RetryMethod;

/// Kinds of errors returned from the server
#[derive(PartialEq, Debug, Clone, Copy, Eq)]
#[non_exhaustive]
pub enum ServerErrorKind {
    /// The server generated an invalid response, or returned a general error.
    ResponseError,
    /// A script execution was aborted.
    ExecAbort,
    /// The server cannot response because it's loading a dump.
    BusyLoading,
    /// A script that was requested does not actually exist.
    NoScript,
    /// Raised if a key moved to a different node.
    Moved,
    /// Raised if a key moved to a different node but we need to ask.
    Ask,
    /// Raised if a request needs to be retried.
    TryAgain,
    /// Raised if a redis cluster is down.
    ClusterDown,
    /// A request spans multiple slots
    CrossSlot,
    /// A cluster master is unavailable.
    MasterDown,
    /// Attempt to write to a read-only server
    ReadOnly,
    /// Authentication is required, or the supplied credentials were rejected.
    NoAuth,
    /// Attempted to use a command without ACL permission.
    NoPerm,
}

impl ServerErrorKind {
    const ALL: [ServerErrorKind; 13] = [
        Self::ResponseError,
        Self::ExecAbort,
        Self::BusyLoading,
        Self::NoScript,
        Self::Moved,
        Self::Ask,
        Self::TryAgain,
        Self::ClusterDown,
        Self::CrossSlot,
        Self::MasterDown,
        Self::ReadOnly,
        Self::NoAuth,
        Self::NoPerm,
    ];

    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::ResponseError => "ERR",
            Self::ExecAbort => "EXECABORT",
            Self::BusyLoading => "LOADING",
            Self::NoScript => "NOSCRIPT",
            Self::Moved => "MOVED",
            Self::Ask => "ASK",
            Self::TryAgain => "TRYAGAIN",
            Self::ClusterDown => "CLUSTERDOWN",
            Self::CrossSlot => "CROSSSLOT",
            Self::MasterDown => "MASTERDOWN",
            Self::ReadOnly => "READONLY",
            Self::NoAuth => "NOAUTH",
            Self::NoPerm => "NOPERM",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        // WRONGPASS shares the handling of a missing AUTH
        if code == "WRONGPASS" {
            return Some(Self::NoAuth);
        }
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub(crate) fn retry_method(&self) -> RetryMethod {
        match self {
            Self::Moved => RetryMethod::MovedRedirect,
            Self::Ask => RetryMethod::AskRedirect,

            Self::TryAgain => RetryMethod::WaitAndRetry,
            Self::MasterDown => RetryMethod::WaitAndRetry,
            Self::ClusterDown => RetryMethod::WaitAndRetry,
            Self::BusyLoading => RetryMethod::WaitAndRetry,

            Self::ResponseError => RetryMethod::NoRetry,
            Self::ReadOnly => RetryMethod::NoRetry,
            Self::ExecAbort => RetryMethod::NoRetry,
            Self::NoScript => RetryMethod::NoRetry,
            Self::CrossSlot => RetryMethod::NoRetry,
            Self::NoAuth => RetryMethod::NoRetry,
            Self::NoPerm => RetryMethod::NoRetry,
        }
    }
}

/// An error that was returned from the server
#[derive(PartialEq, Debug, Clone)]
pub struct ServerError(pub(crate) Repr);

#[derive(PartialEq, Debug, Clone)]
pub(crate) enum Repr {
    Extension {
        code: ArcStr,
        detail: Option<ArcStr>,
    },
    Known {
        kind: ServerErrorKind,
        detail: Option<ArcStr>,
    },
}

impl ServerError {
    /// Builds a server error from the text of an error reply, with or without the leading `-`.
    ///
    /// ```rust
    /// use redis_mux::{ServerError, ServerErrorKind};
    ///
    /// let err = ServerError::from_reply("-MOVED 3999 127.0.0.1:6381");
    /// assert_eq!(err.kind(), Some(ServerErrorKind::Moved));
    /// assert_eq!(err.details(), Some("3999 127.0.0.1:6381"));
    /// ```
    pub fn from_reply(line: &str) -> Self {
        let line = line.strip_prefix('-').unwrap_or(line).trim_end();
        let (code, detail) = match line.split_once(' ') {
            Some((code, detail)) => (code, Some(ArcStr::from(detail))),
            None => (line, None),
        };
        match ServerErrorKind::from_code(code) {
            Some(kind) => ServerError(Repr::Known { kind, detail }),
            None => ServerError(Repr::Extension {
                code: code.into(),
                detail,
            }),
        }
    }

    /// Returns the kind of error. If `None`, try `crate::Self::code` to get the error code.
    pub fn kind(&self) -> Option<ServerErrorKind> {
        match &self.0 {
            Repr::Extension { .. } => None,
            Repr::Known { kind, .. } => Some(*kind),
        }
    }

    /// The error code returned from the server
    pub fn code(&self) -> &str {
        match &self.0 {
            Repr::Extension { code, .. } => code,
            Repr::Known { kind, .. } => kind.code(),
        }
    }

    /// Additional details about the error, if exist
    pub fn details(&self) -> Option<&str> {
        match &self.0 {
            Repr::Extension { detail, .. } => detail.as_ref().map(|str| str.as_str()),
            Repr::Known { detail, .. } => detail.as_ref().map(|str| str.as_str()),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Extension { code, detail } => {
                fmt::Debug::fmt(&code, f)?;
                if let Some(detail) = detail {
                    f.write_str(": ")?;
                    detail.fmt(f)?;
                }
                Ok(())
            }
            Repr::Known { kind, detail } => {
                fmt::Debug::fmt(&kind, f)?;
                if let Some(detail) = detail {
                    f.write_str(": ")?;
                    detail.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_are_classified() {
        let err = ServerError::from_reply("-LOADING Redis is loading the dataset in memory");
        assert_eq!(err.kind(), Some(ServerErrorKind::BusyLoading));
        assert_eq!(err.code(), "LOADING");

        let err = ServerError::from_reply("WRONGPASS invalid username-password pair");
        assert_eq!(err.kind(), Some(ServerErrorKind::NoAuth));
    }

    #[test]
    fn unknown_codes_are_kept_as_extensions() {
        let err = ServerError::from_reply("-MYMODULE something went wrong\r\n");
        assert_eq!(err.kind(), None);
        assert_eq!(err.code(), "MYMODULE");
        assert_eq!(err.details(), Some("something went wrong"));
    }
}
