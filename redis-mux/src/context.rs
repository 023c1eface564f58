//! Addressing descriptors attached to every command.
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::multiplexer::Destination;

bitflags! {
    /// Per-command behaviour flags.
    ///
    /// The routing flags steer the routing indirection when more than one node is
    /// configured; the retry flags feed the retry eligibility policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandFlags: u16 {
        /// The command must be served by a primary.
        const DEMAND_PRIMARY = 1 << 0;
        /// The command must be served by a replica.
        const DEMAND_REPLICA = 1 << 1;
        /// Serve from a replica when one is connected, otherwise from a primary.
        const PREFER_REPLICA = 1 << 2;
        /// Do not follow `MOVED`/`ASK` redirections.
        const NO_REDIRECT = 1 << 3;
        /// Do not wait for the reply.
        const FIRE_AND_FORGET = 1 << 4;
        /// Do not use the script cache for this command.
        const NO_SCRIPT_CACHE = 1 << 5;
        /// Never retry this command.
        const NO_RETRY = 1 << 6;
        /// Retry this command even if it already reached the wire.
        const ALWAYS_RETRY = 1 << 7;
        /// Retry this command only if it never reached the wire.
        const RETRY_IF_NOT_SENT = 1 << 8;

        /// The flags that pick a destination.
        const ROUTING = Self::DEMAND_PRIMARY.bits()
            | Self::DEMAND_REPLICA.bits()
            | Self::PREFER_REPLICA.bits()
            | Self::NO_REDIRECT.bits();
        /// The flags a database view may override.
        const ADDRESSING = Self::ROUTING.bits()
            | Self::FIRE_AND_FORGET.bits()
            | Self::NO_SCRIPT_CACHE.bits();
        /// The flags that feed the retry policy.
        const RETRY = Self::NO_RETRY.bits()
            | Self::ALWAYS_RETRY.bits()
            | Self::RETRY_IF_NOT_SENT.bits();
    }
}

/// Immutable addressing descriptor: where a command goes, with which database and flags.
///
/// Contexts are never mutated; [`DestinationContext::derive`] produces a new one.
#[derive(Clone)]
pub struct DestinationContext {
    database: i64,
    flags: CommandFlags,
    destination: Arc<Destination>,
}

impl DestinationContext {
    pub(crate) fn new(database: i64, flags: CommandFlags, destination: Arc<Destination>) -> Self {
        Self {
            database,
            flags,
            destination,
        }
    }

    /// The database index commands are executed against.
    pub fn database(&self) -> i64 {
        self.database
    }

    /// The flags applied to every command sent through this context.
    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    /// The destination commands are written to.
    pub fn destination(&self) -> &Arc<Destination> {
        &self.destination
    }

    /// Derives a context for `database`, replacing only the flag bits selected by `mask`
    /// with the corresponding bits of `flags`. Bits outside `mask` keep the value of `self`.
    ///
    /// ```rust,ignore
    /// let derived = base.derive(3, CommandFlags::DEMAND_REPLICA, CommandFlags::ROUTING);
    /// ```
    pub fn derive(&self, database: i64, flags: CommandFlags, mask: CommandFlags) -> Self {
        Self {
            database,
            flags: merge_flags(self.flags, flags, mask),
            destination: self.destination.clone(),
        }
    }
}

impl fmt::Debug for DestinationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationContext")
            .field("database", &self.database)
            .field("flags", &self.flags)
            .field("destination", &self.destination.kind())
            .finish()
    }
}

pub(crate) fn merge_flags(base: CommandFlags, value: CommandFlags, mask: CommandFlags) -> CommandFlags {
    (base & !mask) | (value & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_only_touches_masked_bits() {
        let base = CommandFlags::NO_REDIRECT | CommandFlags::FIRE_AND_FORGET;
        let merged = merge_flags(base, CommandFlags::DEMAND_REPLICA, CommandFlags::ROUTING);
        assert_eq!(
            merged,
            CommandFlags::DEMAND_REPLICA | CommandFlags::FIRE_AND_FORGET
        );
    }

    #[test]
    fn bits_outside_mask_are_ignored() {
        let merged = merge_flags(
            CommandFlags::empty(),
            CommandFlags::NO_RETRY | CommandFlags::PREFER_REPLICA,
            CommandFlags::ROUTING,
        );
        assert_eq!(merged, CommandFlags::PREFER_REPLICA);
    }

    #[test]
    fn derive_keeps_destination_and_replaces_database() {
        let base = DestinationContext::new(
            0,
            CommandFlags::NO_SCRIPT_CACHE,
            Arc::new(Destination::Unreachable),
        );
        let derived = base.derive(7, CommandFlags::ALWAYS_RETRY, CommandFlags::RETRY);
        assert_eq!(derived.database(), 7);
        assert_eq!(
            derived.flags(),
            CommandFlags::NO_SCRIPT_CACHE | CommandFlags::ALWAYS_RETRY
        );
        assert!(Arc::ptr_eq(derived.destination(), base.destination()));
        assert_eq!(base.database(), 0);
    }
}
