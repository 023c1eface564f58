use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionSlot, ServerRole, SlotSettings};
use crate::endpoint::Endpoint;
use crate::events::ConnectionType;

struct NodeInner {
    endpoint: Endpoint,
    settings: SlotSettings,
    interactive: ConnectionSlot,
    subscription: OnceLock<ConnectionSlot>,
}

/// One server of the deployment: an interactive connection slot, and a subscription slot
/// that is created the first time publish/subscribe traffic is requested.
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("endpoint", &self.0.endpoint)
            .field("interactive", &self.0.interactive.state())
            .field(
                "subscription",
                &self.0.subscription.get().map(ConnectionSlot::state),
            )
            .finish()
    }
}

impl Node {
    /// Creates a node; nothing is connected yet.
    pub fn new(endpoint: Endpoint, settings: SlotSettings) -> Self {
        let interactive =
            ConnectionSlot::new(endpoint.clone(), ConnectionType::Interactive, settings.clone());
        Self(Arc::new(NodeInner {
            endpoint,
            settings,
            interactive,
            subscription: OnceLock::new(),
        }))
    }

    /// The endpoint of the server.
    pub fn endpoint(&self) -> &Endpoint {
        &self.0.endpoint
    }

    /// The slot carrying ordinary commands.
    pub fn interactive(&self) -> &ConnectionSlot {
        &self.0.interactive
    }

    /// The subscription slot, if it was ever requested.
    pub fn subscription_if_created(&self) -> Option<&ConnectionSlot> {
        self.0.subscription.get()
    }

    /// The subscription slot, created on first use.
    pub fn subscription(&self) -> &ConnectionSlot {
        self.0.subscription.get_or_init(|| {
            log::debug!("{}: creating subscription slot", self.0.endpoint);
            ConnectionSlot::new(
                self.0.endpoint.clone(),
                ConnectionType::Subscription,
                self.0.settings.clone(),
            )
        })
    }

    /// The server version reported by the last handshake.
    pub fn version(&self) -> Option<String> {
        self.0.interactive.server_info().version.clone()
    }

    /// The replication role reported by the last handshake.
    pub fn role(&self) -> ServerRole {
        self.0.interactive.server_info().role
    }

    /// True if the interactive slot is connected.
    pub fn is_connected(&self) -> bool {
        self.0.interactive.is_connected()
    }

    /// True while the interactive slot is connecting.
    pub fn is_connecting(&self) -> bool {
        self.0.interactive.is_connecting()
    }

    /// Connects the interactive slot, see [`ConnectionSlot::connect`].
    pub async fn connect(&self, force: bool, cancel: &CancellationToken) -> bool {
        self.0.interactive.connect(force, cancel).await
    }

    /// Connects the subscription slot, creating it if needed.
    pub async fn connect_subscription(&self, force: bool, cancel: &CancellationToken) -> bool {
        self.subscription().connect(force, cancel).await
    }

    /// Disposes both slots.
    pub fn dispose(&self) {
        self.0.interactive.dispose();
        if let Some(subscription) = self.0.subscription.get() {
            subscription.dispose();
        }
    }

    /// Disposes both slots, waiting for their connections to shut down.
    pub async fn dispose_async(&self) {
        self.0.interactive.dispose_async().await;
        if let Some(subscription) = self.0.subscription.get() {
            subscription.dispose_async().await;
        }
    }
}
