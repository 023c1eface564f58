use crate::context::CommandFlags;
use crate::errors::RedisError;
use crate::message::Message;

/// Which failed commands may be retried when they carry no retry flag of their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Never retry.
    Never,
    /// Retry commands that never reached the wire. Commands the server may have executed
    /// are not retried, so non-idempotent commands don't run twice.
    #[default]
    RetryIfNotSent,
    /// Retry every command, even if the server may have executed it already.
    Always,
}

impl RetryPolicy {
    /// Decides whether `message`, which failed with `error`, may go to the retry queue.
    ///
    /// `NO_RETRY`, administrative commands and internal calls are never retried.
    /// `ALWAYS_RETRY` and `RETRY_IF_NOT_SENT` on the message override the policy.
    /// Only transient connection, transport or protocol errors qualify.
    pub fn is_eligible(&self, message: &Message, error: &RedisError) -> bool {
        let flags = message.flags();
        if flags.contains(CommandFlags::NO_RETRY)
            || message.is_admin()
            || message.is_internal_call()
        {
            return false;
        }

        let allowed = if flags.contains(CommandFlags::ALWAYS_RETRY) {
            true
        } else if flags.contains(CommandFlags::RETRY_IF_NOT_SENT) {
            !message.is_sent()
        } else {
            match self {
                RetryPolicy::Never => false,
                RetryPolicy::RetryIfNotSent => !message.is_sent(),
                RetryPolicy::Always => true,
            }
        };
        allowed && error.is_retry_eligible_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::cmd;
    use crate::errors::{ConnectionFailureType, ErrorKind, ServerError};
    use rstest::rstest;

    fn socket_failure() -> RedisError {
        RedisError::from((
            ErrorKind::ConnectionFailure(ConnectionFailureType::SocketFailure),
            "Connection broke",
        ))
    }

    fn get(flags: CommandFlags) -> Message {
        Message::new(cmd("GET").arg("key").clone(), 0, flags)
    }

    #[rstest]
    #[case(RetryPolicy::Never)]
    #[case(RetryPolicy::RetryIfNotSent)]
    #[case(RetryPolicy::Always)]
    fn no_retry_always_wins(#[case] policy: RetryPolicy) {
        let message = get(CommandFlags::NO_RETRY | CommandFlags::ALWAYS_RETRY);
        assert!(!policy.is_eligible(&message, &socket_failure()));
    }

    #[rstest]
    #[case(RetryPolicy::RetryIfNotSent)]
    #[case(RetryPolicy::Always)]
    fn admin_and_internal_commands_are_never_retried(#[case] policy: RetryPolicy) {
        let admin = Message::new(cmd("CONFIG").arg("SET").clone(), 0, CommandFlags::ALWAYS_RETRY);
        assert!(!policy.is_eligible(&admin, &socket_failure()));
        let internal = Message::internal(cmd("PING"));
        assert!(!policy.is_eligible(&internal, &socket_failure()));
    }

    #[test]
    fn retry_if_not_sent_flips_once_sent() {
        let message = get(CommandFlags::RETRY_IF_NOT_SENT);
        let policy = RetryPolicy::Never;
        assert!(policy.is_eligible(&message, &socket_failure()));
        message.mark_sent();
        assert!(!policy.is_eligible(&message, &socket_failure()));
    }

    #[test]
    fn default_policy_only_retries_unsent() {
        let message = get(CommandFlags::empty());
        let policy = RetryPolicy::default();
        assert!(policy.is_eligible(&message, &socket_failure()));
        message.mark_sent();
        assert!(!policy.is_eligible(&message, &socket_failure()));
        assert!(policy.is_eligible(&get(CommandFlags::ALWAYS_RETRY), &socket_failure()));
    }

    #[rstest]
    #[case(ErrorKind::Unreachable, false)]
    #[case(ErrorKind::ClientError, false)]
    #[case(ErrorKind::InvalidClientConfig, false)]
    #[case(ErrorKind::Timeout, true)]
    #[case(ErrorKind::NoConnectionAvailable, true)]
    #[case(ErrorKind::ProtocolError, true)]
    #[case(ErrorKind::IoError, true)]
    #[case(ErrorKind::AuthenticationFailed, false)]
    #[case(ErrorKind::UnexpectedReturnType, false)]
    fn only_transient_errors_qualify(#[case] kind: ErrorKind, #[case] eligible: bool) {
        let error = RedisError::from((kind, "failed"));
        assert_eq!(
            RetryPolicy::Always.is_eligible(&get(CommandFlags::empty()), &error),
            eligible
        );
    }

    #[rstest]
    #[case("WRONGTYPE Operation against a key holding the wrong kind of value")]
    #[case("NOPERM this user has no permissions to run the 'get' command")]
    #[case("LOADING Redis is loading the dataset in memory")]
    fn server_replies_are_never_retried(#[case] reply: &str) {
        let error: RedisError = ServerError::from_reply(reply).into();
        assert!(!RetryPolicy::default().is_eligible(&get(CommandFlags::empty()), &error));
        assert!(!RetryPolicy::Always.is_eligible(&get(CommandFlags::ALWAYS_RETRY), &error));
    }
}
