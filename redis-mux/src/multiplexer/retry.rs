use std::sync::Weak;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use log::trace;

use super::Inner;
use crate::errors::{ConnectionFailureType, ErrorKind, RedisError};
use crate::retry::{FailedCommand, FailureReason, RetryHandler};

/// Connects the retry queue to the multiplexer that owns it.
pub(crate) struct RetryBridge {
    inner: Weak<Inner>,
    async_timeout: Duration,
}

impl RetryBridge {
    pub(crate) fn new(inner: Weak<Inner>, async_timeout: Duration) -> Self {
        Self {
            inner,
            async_timeout,
        }
    }
}

fn gone() -> RedisError {
    RedisError::from((
        ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed),
        "The multiplexer was dropped",
    ))
}

/// Maps a failed write to the reason it is queued with, or `None` if the error must reach
/// the caller directly.
pub(crate) fn failure_reason(error: &RedisError) -> Option<FailureReason> {
    if !error.is_retry_eligible_kind() {
        return None;
    }
    if error.is_timeout() {
        return Some(FailureReason::Timeout);
    }
    match error.kind() {
        ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed) => {
            Some(FailureReason::ConnectionDisposed)
        }
        _ => Some(FailureReason::WriteFailure),
    }
}

impl RetryHandler for RetryBridge {
    fn is_endpoint_available(&self, command: &FailedCommand) -> Result<bool, RedisError> {
        let inner = self.inner.upgrade().ok_or_else(gone)?;
        let destination = inner.destination.load();
        destination.is_available(command.message())
    }

    fn has_timed_out(&self, command: &FailedCommand) -> bool {
        command.message().elapsed() >= self.async_timeout
    }

    fn timeout_error(&self, command: &FailedCommand) -> RedisError {
        RedisError::from((
            ErrorKind::Timeout,
            "Timed out waiting to be retried",
            format!(
                "{} after {:?}, first failure: {}",
                command.message().cmd().name(),
                command.message().elapsed(),
                command.error()
            ),
        ))
    }

    fn try_resend(&self, command: FailedCommand) -> BoxFuture<'_, ()> {
        async move {
            let Some(inner) = self.inner.upgrade() else {
                command.complete(Err(gone()));
                return;
            };
            // the resend shares the budget of the original call
            let remaining = self.async_timeout.saturating_sub(command.message().elapsed());
            if remaining.is_zero() {
                let err = self.timeout_error(&command);
                command.complete(Err(err));
                return;
            }
            let destination = inner.destination.load_full();
            let error = match tokio::time::timeout(remaining, destination.write(command.message()))
                .await
            {
                Ok(Ok(value)) => {
                    command.complete(Ok(value));
                    return;
                }
                Ok(Err(error)) => error,
                Err(_) => {
                    let err = RedisError::from((
                        ErrorKind::Timeout,
                        "Timed out waiting for the reply to a resent command",
                        format!(
                            "{} after {:?}",
                            command.message().cmd().name(),
                            command.message().elapsed()
                        ),
                    ));
                    command.complete(Err(err));
                    return;
                }
            };

            let Some(topology) = inner.topology.get() else {
                command.complete(Err(error));
                return;
            };
            let eligible = topology
                .options
                .retry_policy()
                .is_eligible(command.message(), &error);
            match failure_reason(&error) {
                Some(reason) if eligible => {
                    trace!("Resend of {:?} failed again, requeueing", command.message().cmd());
                    if let Err(rejected) = topology.retry.admit(command.refail(reason, error)) {
                        rejected.fail();
                    }
                }
                _ => command.complete(Err(error)),
            }
        }
        .boxed()
    }

    fn complete_with_error(&self, command: FailedCommand, error: RedisError) {
        trace!("Failing queued {:?}: {error}", command.message().cmd());
        command.complete(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServerError;

    #[test]
    fn server_errors_are_not_queued() {
        let err: RedisError = ServerError::from_reply("ERR wrong type").into();
        assert_eq!(failure_reason(&err), None);
        let err = RedisError::from((ErrorKind::Unreachable, "nowhere"));
        assert_eq!(failure_reason(&err), None);
    }

    #[test]
    fn connection_errors_are_classified() {
        let err = RedisError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(failure_reason(&err), Some(FailureReason::WriteFailure));
        let err = RedisError::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert_eq!(failure_reason(&err), Some(FailureReason::Timeout));
        let err = RedisError::from((
            ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed),
            "gone",
        ));
        assert_eq!(failure_reason(&err), Some(FailureReason::ConnectionDisposed));
    }
}
