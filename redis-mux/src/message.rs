use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::cmd::Cmd;
use crate::context::CommandFlags;

/// Where a message is in its journey to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    /// Not written to the wire yet.
    WaitingToBeSent = 0,
    /// Written to the wire; the server may have executed it.
    Sent = 1,
}

impl CommandStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CommandStatus::WaitingToBeSent,
            _ => CommandStatus::Sent,
        }
    }
}

/// An outgoing command together with the addressing and bookkeeping it travels with.
///
/// Only the send status changes after creation, and only from waiting to sent.
#[derive(Debug)]
pub struct Message {
    cmd: Cmd,
    database: i64,
    flags: CommandFlags,
    internal: bool,
    admin: bool,
    created: Instant,
    status: AtomicU8,
}

impl Message {
    /// Creates a message for `cmd`, to be executed against `database`.
    pub fn new(cmd: Cmd, database: i64, flags: CommandFlags) -> Self {
        let admin = cmd.is_admin();
        Self {
            cmd,
            database,
            flags,
            internal: false,
            admin,
            created: Instant::now(),
            status: AtomicU8::new(CommandStatus::WaitingToBeSent as u8),
        }
    }

    /// Creates a message issued by the library itself (handshakes, health checks).
    pub fn internal(cmd: Cmd) -> Self {
        Self {
            internal: true,
            ..Self::new(cmd, 0, CommandFlags::NO_RETRY)
        }
    }

    /// The command to send.
    pub fn cmd(&self) -> &Cmd {
        &self.cmd
    }

    /// The database the command targets.
    pub fn database(&self) -> i64 {
        self.database
    }

    /// The flags the command was issued with.
    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    /// True for commands issued by the library itself.
    pub fn is_internal_call(&self) -> bool {
        self.internal
    }

    /// True for commands that manage the server rather than the data.
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// How long ago the message was created.
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// The current send status.
    pub fn status(&self) -> CommandStatus {
        CommandStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// True once any byte of the message reached the wire.
    pub fn is_sent(&self) -> bool {
        self.status() == CommandStatus::Sent
    }

    /// Records that the message reached the wire. Transports call this before the first
    /// byte is written.
    pub fn mark_sent(&self) {
        self.status
            .store(CommandStatus::Sent as u8, Ordering::Release);
    }
}
