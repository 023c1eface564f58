//! The routing indirection used whenever the default destination is not a single
//! connected node.
use std::fmt;

use log::{debug, trace};
use rand::seq::SliceRandom;

use crate::cmd::cmd;
use crate::connection::ServerRole;
use crate::context::CommandFlags;
use crate::endpoint::Endpoint;
use crate::errors::{ErrorKind, RedisError, ServerErrorKind};
use crate::message::Message;
use crate::node::Node;
use crate::types::{RedisResult, Value};

/// The number of hash slots keys are distributed over.
pub const SLOT_SIZE: u16 = 16384;

fn slot(key: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(key) % SLOT_SIZE
}

/// Returns the hash slot of `key`, honouring `{hashtag}`s.
pub fn get_slot(key: &[u8]) -> u16 {
    let key = match get_hashtag(key) {
        Some(tag) => tag,
        None => key,
    };

    slot(key)
}

fn get_hashtag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|v| *v == b'{')?;
    let close = key[open..].iter().position(|v| *v == b'}')?;

    let rv = &key[open + 1..open + close];
    if rv.is_empty() {
        None
    } else {
        Some(rv)
    }
}

/// Picks a node for every message.
///
/// Only connected nodes are candidates. `DEMAND_REPLICA` restricts them to replicas,
/// `PREFER_REPLICA` prefers replicas and falls back to primaries, and everything else goes
/// to primaries; nodes with an unknown role count as primaries. Keyed messages are
/// spread by hash slot, keyless ones at random. `MOVED` and `ASK` replies are followed
/// once unless `NO_REDIRECT` is set.
pub struct RoutingConnection {
    nodes: Vec<Node>,
}

impl fmt::Debug for RoutingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(Node::endpoint))
            .finish()
    }
}

impl RoutingConnection {
    pub(crate) fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// The nodes routed over.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn candidates(&self, flags: CommandFlags) -> Vec<&Node> {
        let connected = || self.nodes.iter().filter(|node| node.is_connected());
        let primaries = || connected().filter(|node| node.role() != ServerRole::Replica);
        let replicas = || connected().filter(|node| node.role() == ServerRole::Replica);

        if flags.contains(CommandFlags::DEMAND_REPLICA) {
            replicas().collect()
        } else if flags.contains(CommandFlags::PREFER_REPLICA) {
            let replicas: Vec<_> = replicas().collect();
            if replicas.is_empty() {
                primaries().collect()
            } else {
                replicas
            }
        } else {
            primaries().collect()
        }
    }

    /// Chooses the node `message` is written to.
    pub fn select(&self, message: &Message) -> RedisResult<&Node> {
        let candidates = self.candidates(message.flags());
        let chosen = match message.cmd().first_key() {
            Some(key) if !candidates.is_empty() => {
                candidates.get(usize::from(get_slot(key)) % candidates.len())
            }
            _ => candidates.choose(&mut rand::thread_rng()),
        };
        match chosen {
            Some(node) => Ok(*node),
            None => Err(RedisError::from((
                ErrorKind::NoConnectionAvailable,
                "No connected node can serve the command",
                format!("{:?}", message.flags() & CommandFlags::ROUTING),
            ))),
        }
    }

    /// Writes `message` to the node chosen for it.
    pub async fn write(&self, message: &Message) -> RedisResult<Value> {
        let node = self.select(message)?;
        trace!("Routing {:?} to {}", message.cmd().name(), node.endpoint());
        let result = node.interactive().write(message).await;

        let err = match result {
            Err(err) if !message.flags().contains(CommandFlags::NO_REDIRECT) => err,
            result => return result,
        };
        let Some(target) = self.redirect_target(&err) else {
            return Err(err);
        };
        debug!(
            "Following {} for {:?} to {}",
            err.category(),
            message.cmd().name(),
            target.endpoint()
        );
        if err.kind() == ErrorKind::ServerError(ServerErrorKind::Ask) {
            let asking = Message::internal(cmd("ASKING"));
            target.interactive().write(&asking).await?;
        }
        target.interactive().write(message).await
    }

    fn redirect_target(&self, err: &RedisError) -> Option<&Node> {
        let (addr, _slot) = err.redirect_node()?;
        let endpoint: Endpoint = addr.parse().ok()?;
        self.nodes
            .iter()
            .find(|node| node.endpoint() == &endpoint && node.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"foo", 12182)]
    #[case(b"hello", 866)]
    fn slots_match_the_server(#[case] key: &[u8], #[case] expected: u16) {
        assert_eq!(get_slot(key), expected);
    }

    #[test]
    fn hashtags_share_a_slot() {
        let slot = get_slot(b"user1000");
        assert_eq!(get_slot(b"{user1000}.following"), slot);
        assert_eq!(get_slot(b"{user1000}.followers"), slot);
    }

    #[test]
    fn empty_hashtag_hashes_the_whole_key() {
        assert_eq!(get_slot(b"foo{}bar"), slot(b"foo{}bar"));
        assert_eq!(get_hashtag(b"foo{bar"), None);
        assert_eq!(get_hashtag(b"a{b}c{d}"), Some(&b"b"[..]));
    }

    #[test]
    fn no_connected_nodes_means_no_connection() {
        let routing = RoutingConnection::new(Vec::new());
        let message = Message::new(cmd("GET").arg("foo").clone(), 0, CommandFlags::empty());
        assert_eq!(
            routing.select(&message).unwrap_err().kind(),
            ErrorKind::NoConnectionAvailable
        );
    }
}
