//! The topology router: owns the nodes of a deployment and hands out the destination
//! contexts commands are executed through.
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::future::join_all;
use log::{debug, trace, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cmd::Cmd;
use crate::config::ConfigurationOptions;
use crate::connection::{
    ConnectionSlot, ConnectionState, Handshake, SlotSettings, StandardHandshake, Transport,
};
use crate::context::{CommandFlags, DestinationContext};
use crate::endpoint::normalize_endpoints;
use crate::errors::{ConnectionFailureType, ErrorKind, RedisError};
use crate::events::{ConnectionEvent, EventSender};
use crate::log_sink::sink_line;
use crate::message::Message;
use crate::node::Node;
use crate::retry::{FailedCommand, RetryQueue};
use crate::routing::RoutingConnection;
use crate::types::{RedisResult, Value};

mod database;
mod destination;
mod retry;
mod wait;

pub use database::Database;
pub use destination::{Destination, DestinationKind};
use retry::{failure_reason, RetryBridge};

/// Databases below this index have their default context cached.
const DB_CACHE_SIZE: usize = 16;

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything that is fixed by a successful `connect`.
struct Topology {
    options: ConfigurationOptions,
    nodes: Vec<Node>,
    retry: RetryQueue<RetryBridge>,
    runtime: Handle,
}

struct Inner {
    transport: Arc<dyn Transport>,
    handshake: Option<Arc<dyn Handshake>>,
    started: AtomicBool,
    topology: OnceLock<Topology>,
    destination: ArcSwap<Destination>,
    db_cache: [ArcSwapOption<DestinationContext>; DB_CACHE_SIZE],
    lifetime: CancellationToken,
    disposed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.lifetime.cancel();
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

/// A multiplexer over the nodes of one deployment.
///
/// Every command goes through a [`DestinationContext`], derived from the default
/// destination the multiplexer recomputes whenever a node connects or fails: commands
/// fail fast when no endpoint is configured, go straight to the interactive connection
/// of a single connected node, and are routed per command otherwise. Commands that fail
/// with a connection error are parked in a retry queue, and resent once their node is
/// available again.
///
/// Cloning is cheap and every clone refers to the same multiplexer.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # async fn run(transport: Arc<dyn redis_mux::Transport>) -> redis_mux::RedisResult<()> {
/// let options: redis_mux::ConfigurationOptions = "cache-1:6379,cache-2:6379".parse()?;
/// let mux = redis_mux::Multiplexer::new(transport);
/// let connected = mux.connect(options).await?;
/// let value = mux.database(0).execute(redis_mux::cmd("GET").arg("key").clone()).await?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Multiplexer(Arc<Inner>);

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("destination", &self.0.destination.load().kind())
            .field("nodes", &self.nodes())
            .field("retry_queue_len", &self.retry_queue_len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn already_connected() -> RedisError {
    RedisError::from((
        ErrorKind::ClientError,
        "connect may only be called once per multiplexer",
    ))
}

fn disposed_error() -> RedisError {
    RedisError::from((
        ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed),
        "The multiplexer was disposed",
    ))
}

fn not_connected() -> RedisError {
    RedisError::from((ErrorKind::ClientError, "The multiplexer is not connected"))
}

impl Multiplexer {
    /// Creates a multiplexer opening connections through `transport`. Nothing is connected
    /// until [`Multiplexer::connect`] is called.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::build(transport, None)
    }

    /// Like [`Multiplexer::new`], but every new connection runs `handshake` instead of the
    /// handshake derived from the configuration.
    pub fn with_handshake(transport: Arc<dyn Transport>, handshake: Arc<dyn Handshake>) -> Self {
        Self::build(transport, Some(handshake))
    }

    fn build(transport: Arc<dyn Transport>, handshake: Option<Arc<dyn Handshake>>) -> Self {
        Self(Arc::new(Inner {
            transport,
            handshake,
            started: AtomicBool::new(false),
            topology: OnceLock::new(),
            destination: ArcSwap::from_pointee(Destination::Unreachable),
            db_cache: std::array::from_fn(|_| ArcSwapOption::empty()),
            lifetime: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Creates a multiplexer and connects it. See [`Multiplexer::connect`].
    pub async fn connect_with(
        options: ConfigurationOptions,
        transport: Arc<dyn Transport>,
    ) -> RedisResult<Self> {
        let multiplexer = Self::new(transport);
        multiplexer.connect(options).await?;
        Ok(multiplexer)
    }

    /// Creates one node per configured endpoint and connects all of them concurrently.
    ///
    /// Resolves to the number of nodes that connected. Nodes that failed are reported
    /// through connection events and reconnected by the heartbeat; the multiplexer is
    /// usable as long as one node is reachable.
    ///
    /// Fails with [`ErrorKind::ClientError`] when called a second time, and when called
    /// outside of a tokio runtime.
    pub async fn connect(&self, options: ConfigurationOptions) -> RedisResult<usize> {
        if self.0.started.swap(true, Ordering::AcqRel) {
            return Err(already_connected());
        }
        if self.is_disposed() {
            return Err(disposed_error());
        }
        let runtime = Handle::try_current().map_err(|err| {
            RedisError::from((
                ErrorKind::ClientError,
                "connect must be called from within a tokio runtime",
                err.to_string(),
            ))
        })?;

        let endpoints =
            normalize_endpoints(options.endpoints(), options.server_type(), options.ssl());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handshake: Arc<dyn Handshake> = match &self.0.handshake {
            Some(handshake) => handshake.clone(),
            None => Arc::new(StandardHandshake::from_options(&options)),
        };
        let settings = SlotSettings::new(self.0.transport.clone())
            .set_handshake(handshake)
            .set_connect_timeout(options.connect_timeout())
            .set_event_sender(events_tx)
            .set_log_sink(options.log_sink().cloned());
        let nodes: Vec<Node> = endpoints
            .into_iter()
            .map(|endpoint| Node::new(endpoint, settings.clone()))
            .collect();
        let retry = RetryQueue::new(
            RetryBridge::new(Arc::downgrade(&self.0), options.async_timeout()),
            options.retry_queue_max_length(),
        );
        let topology = Topology {
            options,
            nodes,
            retry,
            runtime,
        };
        if self.0.topology.set(topology).is_err() {
            return Err(already_connected());
        }
        let topology = self.topology()?;

        sink_line!(
            topology.options.log_sink(),
            "Connecting to {} endpoint(s): {}",
            topology.nodes.len(),
            topology
                .nodes
                .iter()
                .map(|node| node.endpoint().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        // runs until every slot is gone, so disposal events are still forwarded
        topology.runtime.spawn(pump_events(
            Arc::downgrade(&self.0),
            events_rx,
            topology.options.event_sender().cloned(),
        ));

        let cancel = self.0.lifetime.child_token();
        let connected = join_all(topology.nodes.iter().map(|node| node.connect(false, &cancel)))
            .await
            .into_iter()
            .filter(|connected| *connected)
            .count();
        self.on_nodes_changed();

        sink_line!(
            topology.options.log_sink(),
            "{connected} of {} endpoint(s) connected",
            topology.nodes.len()
        );
        debug!(
            "Connected {connected}/{} nodes, destination is {:?}",
            topology.nodes.len(),
            self.0.destination.load().kind()
        );

        self.spawn(run_heartbeat(
            Arc::downgrade(&self.0),
            topology.options.heartbeat_interval(),
            self.0.lifetime.clone(),
        ));
        Ok(connected)
    }

    fn topology(&self) -> RedisResult<&Topology> {
        self.0.topology.get().ok_or_else(not_connected)
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let Some(topology) = self.0.topology.get() else {
            return;
        };
        let handle = topology.runtime.spawn(task);
        let mut tasks = self.0.tasks();
        if self.is_disposed() {
            handle.abort();
        } else {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        }
    }

    /// Recomputes the default destination from the current state of the nodes.
    ///
    /// A disposed multiplexer keeps its disposed destination.
    pub(crate) fn on_nodes_changed(&self) {
        let Some(topology) = self.0.topology.get() else {
            return;
        };
        let next = match topology.nodes.as_slice() {
            [] => Destination::Unreachable,
            [node] if node.is_connected() => Destination::Direct(node.interactive().clone()),
            nodes => Destination::Routed(RoutingConnection::new(nodes.to_vec())),
        };

        let current = self.0.destination.load_full();
        if current.same_target(&next) {
            return;
        }
        let next = Arc::new(next);
        let prev = self.0.destination.compare_and_swap(&current, next.clone());
        if Arc::ptr_eq(&prev, &current) {
            debug!(
                "Default destination changed from {:?} to {:?}",
                current.kind(),
                next.kind()
            );
        } else {
            trace!("Lost the race to replace the default destination");
        }
    }

    /// The current default destination.
    pub fn destination(&self) -> Arc<Destination> {
        self.0.destination.load_full()
    }

    /// The context of the default database, without any flags.
    pub fn default_context(&self) -> DestinationContext {
        let database = self
            .0
            .topology
            .get()
            .map(|topology| topology.options.default_database())
            .unwrap_or_default();
        DestinationContext::new(database, CommandFlags::empty(), self.destination())
    }

    /// The context of `database`, with the addressing bits of `flags` applied on top of
    /// the default context. Bits outside [`CommandFlags::ADDRESSING`] are ignored.
    pub fn context(&self, database: i64, flags: CommandFlags) -> DestinationContext {
        let base = self.default_context();
        let cache_entry = usize::try_from(database)
            .ok()
            .filter(|_| flags.is_empty())
            .and_then(|index| self.0.db_cache.get(index));
        let Some(entry) = cache_entry else {
            return base.derive(database, flags, CommandFlags::ADDRESSING);
        };

        if let Some(cached) = entry.load_full() {
            if Arc::ptr_eq(cached.destination(), base.destination()) {
                return (*cached).clone();
            }
        }
        let context = base.derive(database, flags, CommandFlags::ADDRESSING);
        entry.store(Some(Arc::new(context.clone())));
        context
    }

    /// A view of `database`.
    pub fn database(&self, database: i64) -> Database {
        self.database_with_flags(database, CommandFlags::empty())
    }

    /// A view of `database` whose commands carry the addressing bits of `flags`.
    pub fn database_with_flags(&self, database: i64, flags: CommandFlags) -> Database {
        Database::new(self.clone(), self.context(database, flags))
    }

    /// Executes `cmd` through `context` and resolves to its reply.
    ///
    /// `flags` are added to the flags of the context. Commands that fail with a connection
    /// error and pass the retry policy are queued, and resolve once resent or failed for
    /// good. Fire-and-forget commands resolve to [`Value::Nil`] as soon as they are
    /// dispatched.
    pub async fn execute(
        &self,
        context: &DestinationContext,
        cmd: Cmd,
        flags: CommandFlags,
    ) -> RedisResult<Value> {
        let message = Arc::new(Message::new(
            cmd,
            context.database(),
            context.flags() | flags,
        ));
        if self.is_disposed() {
            return Err(disposed_error());
        }
        let destination = self.resolve(context);
        let Some(topology) = self.0.topology.get() else {
            return destination.write(&message).await;
        };

        if message.flags().contains(CommandFlags::FIRE_AND_FORGET) {
            let task_message = message.clone();
            topology.runtime.spawn(async move {
                if let Err(err) = destination.write(&task_message).await {
                    debug!("Fire-and-forget {:?} failed: {err}", task_message.cmd());
                }
            });
            return Ok(Value::Nil);
        }

        let timeout = topology.options.async_timeout();
        let error = match tokio::time::timeout(timeout, destination.write(&message)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => RedisError::from((
                ErrorKind::Timeout,
                "Timed out waiting for the reply",
                format!("{} after {timeout:?}", message.cmd().name()),
            )),
        };

        let Some(reason) = failure_reason(&error) else {
            return Err(error);
        };
        // no node can take the command right now
        if error.kind() == ErrorKind::NoConnectionAvailable
            && !message.is_sent()
            && !matches!(destination.is_available(&message), Ok(true))
        {
            return Err(error);
        }
        if !topology
            .options
            .retry_policy()
            .is_eligible(&message, &error)
        {
            return Err(error);
        }

        let (tx, rx) = oneshot::channel();
        let mut failed = FailedCommand::new(message.clone(), reason, error).with_completion(tx);
        if let Some(slot) = destination.as_direct() {
            failed = failed.with_endpoint(slot.endpoint().clone());
        }
        trace!("Queueing {:?} for retry ({reason:?})", message.cmd());
        if let Err(rejected) = topology.retry.admit(failed) {
            warn!(
                "Retry queue is full ({} entries), failing {:?}",
                topology.retry.len(),
                message.cmd()
            );
            rejected.fail();
        } else {
            self.kick_drain();
        }

        // the queue never resends past the budget
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(disposed_error()),
            Err(_) => Err(RedisError::from((
                ErrorKind::Timeout,
                "Timed out waiting to be retried",
                format!("{} after {:?}", message.cmd().name(), message.elapsed()),
            ))),
        }
    }

    /// The destination `context` is executed against: its own unless a newer default was
    /// published since it was derived.
    fn resolve(&self, context: &DestinationContext) -> Arc<Destination> {
        let current = self.0.destination.load_full();
        if !Arc::ptr_eq(context.destination(), &current) {
            trace!(
                "Context targets {:?}, using current {:?}",
                context.destination().kind(),
                current.kind()
            );
        }
        current
    }

    /// Spawns a retry queue pass; resends never run on the caller's task.
    fn kick_drain(&self) {
        let Some(topology) = self.0.topology.get() else {
            return;
        };
        let inner = Arc::downgrade(&self.0);
        topology.runtime.spawn(async move {
            if let Some(inner) = inner.upgrade() {
                Multiplexer(inner).drain_retry_queue().await;
            }
        });
    }

    async fn drain_retry_queue(&self) {
        let Some(topology) = self.0.topology.get() else {
            return;
        };
        let removed = topology.retry.drain_tick().await;
        if removed > 0 {
            trace!(
                "Drained {removed} queued command(s), {} left",
                topology.retry.len()
            );
        }
    }

    /// Runs one heartbeat pass: fails queued commands that timed out, reconnects nodes
    /// that are faulted or were never connected, recomputes the default destination and
    /// starts a retry queue pass in the background.
    ///
    /// The background heartbeat calls this every `heartbeat_interval`.
    pub async fn heartbeat(&self) {
        let Some(topology) = self.0.topology.get() else {
            return;
        };
        if self.is_disposed() {
            return;
        }

        let swept = topology.retry.sweep_timeouts();
        if swept > 0 {
            debug!("Failed {swept} queued command(s) that timed out");
        }

        if topology.options.reconnect_on_heartbeat() {
            let cancel = self.0.lifetime.child_token();
            let cancel = &cancel;
            let reconnects = topology.nodes.iter().flat_map(move |node| {
                let mut slots = vec![node.interactive()];
                slots.extend(node.subscription_if_created());
                slots
                    .into_iter()
                    .filter(|slot| {
                        matches!(
                            slot.state(),
                            ConnectionState::Faulted | ConnectionState::Disconnected
                        )
                    })
                    .map(move |slot| slot.connect(false, cancel))
                    .collect::<Vec<_>>()
            });
            let restored = join_all(reconnects)
                .await
                .into_iter()
                .filter(|connected| *connected)
                .count();
            if restored > 0 {
                debug!("Heartbeat reconnected {restored} connection(s)");
            }
        }

        self.on_nodes_changed();
        self.kick_drain();
    }

    /// Connects and returns the subscription slot of the first connected node.
    pub async fn subscriber(&self) -> RedisResult<ConnectionSlot> {
        let topology = self.topology()?;
        let node = topology
            .nodes
            .iter()
            .find(|node| node.is_connected())
            .ok_or_else(|| {
                RedisError::from((
                    ErrorKind::NoConnectionAvailable,
                    "No connected node to subscribe through",
                ))
            })?;
        let cancel = self.0.lifetime.child_token();
        if node.connect_subscription(false, &cancel).await {
            Ok(node.subscription().clone())
        } else {
            Err(RedisError::from((
                ErrorKind::ConnectionFailure(ConnectionFailureType::UnableToConnect),
                "Could not connect the subscription connection",
                node.endpoint().to_string(),
            )))
        }
    }

    /// The nodes created by `connect`.
    pub fn nodes(&self) -> &[Node] {
        self.0
            .topology
            .get()
            .map(|topology| topology.nodes.as_slice())
            .unwrap_or_default()
    }

    /// True if at least one node is connected.
    pub fn is_connected(&self) -> bool {
        self.nodes().iter().any(Node::is_connected)
    }

    /// The number of commands waiting to be retried.
    pub fn retry_queue_len(&self) -> usize {
        self.0
            .topology
            .get()
            .map(|topology| topology.retry.len())
            .unwrap_or_default()
    }

    /// The configuration passed to `connect`.
    pub fn options(&self) -> Option<&ConfigurationOptions> {
        self.0.topology.get().map(|topology| &topology.options)
    }

    pub(crate) fn sync_timeout(&self) -> Duration {
        self.options()
            .map(ConfigurationOptions::sync_timeout)
            .unwrap_or(DEFAULT_SYNC_TIMEOUT)
    }

    /// True once the multiplexer was disposed.
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    /// Returns the nodes to dispose, or `None` if the multiplexer already was.
    fn begin_dispose(&self) -> Option<&[Node]> {
        if self.0.disposed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let previous = self.0.destination.swap(Arc::new(Destination::Disposed));
        self.0.lifetime.cancel();
        debug!("Disposing multiplexer, destination was {:?}", previous.kind());
        drop(previous);

        for entry in &self.0.db_cache {
            entry.store(None);
        }
        for task in self.0.tasks().drain(..) {
            task.abort();
        }
        Some(self.nodes())
    }

    fn finish_dispose(&self) {
        if let Some(topology) = self.0.topology.get() {
            let failed = topology.retry.dispose();
            if failed > 0 {
                debug!("Failed {failed} queued command(s) on dispose");
            }
        }
    }

    /// Disposes every node and fails every queued command. Idempotent.
    pub fn dispose(&self) {
        let Some(nodes) = self.begin_dispose() else {
            return;
        };
        for node in nodes {
            node.dispose();
        }
        self.finish_dispose();
    }

    /// Like [`Multiplexer::dispose`], but waits for the transports to shut down.
    pub async fn dispose_async(&self) {
        let Some(nodes) = self.begin_dispose() else {
            return;
        };
        join_all(nodes.iter().map(Node::dispose_async)).await;
        self.finish_dispose();
    }
}

/// Forwards connection events to the configured sender, and reacts to them.
async fn pump_events(
    inner: Weak<Inner>,
    mut events: UnboundedReceiver<ConnectionEvent>,
    sender: Option<Arc<dyn EventSender>>,
) {
    while let Some(event) = events.recv().await {
        trace!("Connection event: {event:?}");
        let restored = matches!(event, ConnectionEvent::Restored(_));
        if let Some(sender) = &sender {
            if sender.send(event).is_err() {
                debug!("Connection event receiver is gone");
            }
        }

        let Some(inner) = inner.upgrade() else {
            continue;
        };
        let multiplexer = Multiplexer(inner);
        if multiplexer.is_disposed() {
            continue;
        }
        multiplexer.on_nodes_changed();
        if restored {
            multiplexer.kick_drain();
        }
    }
}

async fn run_heartbeat(inner: Weak<Inner>, period: Duration, lifetime: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = lifetime.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Multiplexer(inner).heartbeat().await;
    }
}
