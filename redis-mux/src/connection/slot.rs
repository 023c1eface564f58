use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{debug, trace, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionHandle, Handshake, ServerInfo, StandardHandshake, Transport};
use crate::endpoint::Endpoint;
use crate::errors::{closed_connection_error, ConnectionFailureType, ErrorKind, RedisError};
use crate::events::{
    ConnectionEvent, ConnectionFailedEvent, ConnectionRestoredEvent, ConnectionType,
};
use crate::log_sink::{sink_line, LogSink};
use crate::message::Message;
use crate::types::{RedisResult, Value};

/// The lifecycle of a [`ConnectionSlot`].
///
/// `Disposed` is terminal. Every other state can be reached from every other state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Never connected.
    Disconnected = 0,
    /// A connection attempt owns the slot.
    Connecting = 1,
    /// The current handle is usable.
    Connected = 2,
    /// The last attempt failed, or the connection broke.
    Faulted = 3,
    /// The slot was disposed.
    Disposed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Faulted,
            _ => ConnectionState::Disposed,
        }
    }
}

/// Collaborators shared by the slots of one multiplexer.
#[derive(Clone)]
pub struct SlotSettings {
    transport: Arc<dyn Transport>,
    handshake: Arc<dyn Handshake>,
    connect_timeout: Duration,
    events: Option<UnboundedSender<ConnectionEvent>>,
    log_sink: Option<LogSink>,
}

impl SlotSettings {
    /// Settings opening connections through `transport`, with the default RESP2 handshake
    /// and a five second connect timeout.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handshake: Arc::new(StandardHandshake::default()),
            connect_timeout: Duration::from_secs(5),
            events: None,
            log_sink: None,
        }
    }

    /// Sets the handshake run on every new connection.
    pub fn set_handshake(mut self, handshake: Arc<dyn Handshake>) -> Self {
        self.handshake = handshake;
        self
    }

    /// Each connection attempt will time out after `timeout`.
    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the channel failure and restoration events are published to.
    pub fn set_event_sender(mut self, events: UnboundedSender<ConnectionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the sink receiving connect progress lines.
    pub fn set_log_sink(mut self, sink: Option<LogSink>) -> Self {
        self.log_sink = sink;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Opening,
    Handshake,
}

struct SlotInner {
    endpoint: Endpoint,
    connection_type: ConnectionType,
    label: String,
    state: AtomicU8,
    handle: ArcSwap<ConnectionHandle>,
    server_info: ArcSwap<ServerInfo>,
    settings: SlotSettings,
}

/// A cell holding one connection to one endpoint for one kind of traffic.
///
/// The state only changes through compare-and-swap, and the handle is swapped as a
/// unit. A connect attempt publishes its handle before committing `Connected`, and rolls
/// the handle back if the commit loses a race. Readers take one snapshot of the handle
/// per operation.
///
/// Cloning is cheap and every clone refers to the same slot.
#[derive(Clone)]
pub struct ConnectionSlot(Arc<SlotInner>);

impl fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("label", &self.0.label)
            .field("state", &self.state())
            .field("handle", &self.0.handle.load().id())
            .finish()
    }
}

impl ConnectionSlot {
    /// Creates a disconnected slot.
    pub fn new(endpoint: Endpoint, connection_type: ConnectionType, settings: SlotSettings) -> Self {
        let label = format!("{endpoint}/{connection_type}");
        Self(Arc::new(SlotInner {
            endpoint,
            connection_type,
            label,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            handle: ArcSwap::from_pointee(ConnectionHandle::null()),
            server_info: ArcSwap::from_pointee(ServerInfo::default()),
            settings,
        }))
    }

    /// The endpoint this slot connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.0.endpoint
    }

    /// The traffic this slot carries.
    pub fn connection_type(&self) -> ConnectionType {
        self.0.connection_type
    }

    /// `endpoint/type`, used in logs.
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.0.state()
    }

    /// True if the current handle is usable.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True while a connect attempt owns the slot.
    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// A snapshot of the current handle.
    pub fn current(&self) -> Arc<ConnectionHandle> {
        self.0.handle.load_full()
    }

    /// What the handshake of the current connection learned about the server.
    pub fn server_info(&self) -> Arc<ServerInfo> {
        self.0.server_info.load_full()
    }

    /// True if both values refer to the same slot.
    pub fn ptr_eq(&self, other: &ConnectionSlot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Connects the slot.
    ///
    /// Returns `true` if the slot is connected afterwards, or if it already was connected
    /// or connecting and `force` is `false`, in which case no connection is opened.
    /// Failures are never retried here; they move the slot to `Faulted`, publish a
    /// [`ConnectionEvent::Failed`] and return `false`. A disposed slot always returns `false`.
    pub async fn connect(&self, force: bool, cancel: &CancellationToken) -> bool {
        let inner = &self.0;
        let original = loop {
            let current = inner.state();
            match current {
                ConnectionState::Disposed => {
                    debug!("{}: not connecting, slot is disposed", inner.label);
                    return false;
                }
                ConnectionState::Connected | ConnectionState::Connecting if !force => {
                    return true;
                }
                _ => {}
            }
            if inner.transition(current, ConnectionState::Connecting) {
                break current;
            }
        };
        debug!("{}: {original:?} -> Connecting", inner.label);

        match inner.establish(original, cancel).await {
            Ok(connected) => connected,
            Err((phase, err)) => {
                let failure = inner.classify(phase, &err, cancel);
                inner.fault(failure, err);
                false
            }
        }
    }

    /// Writes a message through the current connection.
    ///
    /// A write failing because the connection dropped faults the slot, the same way a
    /// failure reported through the connection's [`ErrorSink`] does.
    pub async fn write(&self, message: &Message) -> RedisResult<Value> {
        let handle = self.current();
        let result = handle.write(message).await;
        if let Err(err) = &result {
            if !handle.is_null() && (err.is_connection_dropped() || err.is_io_error()) {
                self.0.connection_broke(handle.id(), err.clone_mostly("write failed"));
            }
        }
        result
    }

    /// Disposes the slot and its connection. Idempotent.
    pub fn dispose(&self) {
        let old = self.0.begin_dispose();
        old.dispose();
    }

    /// Disposes the slot, waiting for the connection to shut down. Idempotent.
    pub async fn dispose_async(&self) {
        let old = self.0.begin_dispose();
        old.dispose_async().await;
    }
}

impl SlotInner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(events) = &self.settings.events {
            let _ = events.send(event);
        }
    }

    fn emit_failed(&self, failure_type: ConnectionFailureType, error: RedisError) {
        self.emit(ConnectionEvent::Failed(ConnectionFailedEvent {
            endpoint: self.endpoint.clone(),
            connection_type: self.connection_type,
            failure_type,
            error,
        }));
    }

    async fn establish(
        self: &Arc<Self>,
        original: ConnectionState,
        cancel: &CancellationToken,
    ) -> Result<bool, (Phase, RedisError)> {
        sink_line!(
            self.settings.log_sink.as_ref(),
            "{}: connecting ({:?})",
            self.label,
            original
        );
        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err((Phase::Opening, closed_connection_error())),
            opened = tokio::time::timeout(
                self.settings.connect_timeout,
                self.settings.transport.open(&self.endpoint, cancel.child_token()),
            ) => match opened {
                Ok(Ok(connection)) => connection,
                Ok(Err(err)) => return Err((Phase::Opening, err)),
                Err(_) => {
                    return Err((
                        Phase::Opening,
                        RedisError::from((ErrorKind::Timeout, "Connection attempt timed out")),
                    ))
                }
            },
        };

        let handle = Arc::new(ConnectionHandle::new(connection));
        let info = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(closed_connection_error()),
            info = self.settings.handshake.handshake(&handle, &self.endpoint) => info,
        };
        match info {
            Ok(info) => Ok(self.finalize(original, handle, info)),
            Err(err) => {
                handle.dispose();
                Err((Phase::Handshake, err))
            }
        }
    }

    fn finalize(
        self: &Arc<Self>,
        original: ConnectionState,
        handle: Arc<ConnectionHandle>,
        info: ServerInfo,
    ) -> bool {
        let previous = self.handle.swap(handle.clone());
        if self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            previous.dispose();
            self.server_info.store(Arc::new(info));
            handle.subscribe_errors(ErrorSink {
                slot: Arc::downgrade(self),
                connection_id: handle.id(),
            });
            debug!("{}: {original:?} -> Connected", self.label);
            sink_line!(self.settings.log_sink.as_ref(), "{}: connected", self.label);
            if original == ConnectionState::Faulted {
                self.emit(ConnectionEvent::Restored(ConnectionRestoredEvent {
                    endpoint: self.endpoint.clone(),
                    connection_type: self.connection_type,
                }));
            }
            return true;
        }

        let state = self.state();
        if state == ConnectionState::Disposed {
            let current = self.handle.swap(Arc::new(ConnectionHandle::null()));
            current.dispose();
            previous.dispose();
        } else {
            let displaced = self.handle.compare_and_swap(&handle, previous.clone());
            if !Arc::ptr_eq(&displaced, &handle) {
                // another attempt replaced our handle; nothing refers to `previous` anymore
                previous.dispose();
            }
        }
        handle.dispose();
        debug!("{}: connect lost a race, slot is {state:?}", self.label);
        false
    }

    fn classify(
        &self,
        phase: Phase,
        error: &RedisError,
        cancel: &CancellationToken,
    ) -> ConnectionFailureType {
        if cancel.is_cancelled()
            || self.state() == ConnectionState::Disposed
            || error.connection_failure() == Some(ConnectionFailureType::ConnectionDisposed)
        {
            ConnectionFailureType::ConnectionDisposed
        } else if error.kind() == ErrorKind::AuthenticationFailed {
            ConnectionFailureType::AuthenticationFailure
        } else if phase == Phase::Opening {
            ConnectionFailureType::UnableToConnect
        } else if error.is_io_error()
            || error.is_connection_dropped()
            || matches!(
                error.kind(),
                ErrorKind::ProtocolError | ErrorKind::ConnectionFailure(_) | ErrorKind::Timeout
            )
        {
            ConnectionFailureType::SocketFailure
        } else {
            ConnectionFailureType::InternalFailure
        }
    }

    fn fault(&self, failure: ConnectionFailureType, error: RedisError) {
        let mut current = self.state();
        while current != ConnectionState::Disposed {
            match self.state.compare_exchange(
                current as u8,
                ConnectionState::Faulted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = ConnectionState::from_u8(actual),
            }
        }
        let old = self.handle.swap(Arc::new(ConnectionHandle::null()));
        old.dispose();

        warn!("{}: connection failed, {failure}: {error}", self.label);
        sink_line!(
            self.settings.log_sink.as_ref(),
            "{}: failed, {}: {}",
            self.label,
            failure,
            error
        );
        self.emit_failed(failure, error);
    }

    fn begin_dispose(&self) -> Arc<ConnectionHandle> {
        let previous =
            ConnectionState::from_u8(self.state.swap(ConnectionState::Disposed as u8, Ordering::AcqRel));
        let old = self.handle.swap(Arc::new(ConnectionHandle::null()));
        if previous != ConnectionState::Disposed {
            debug!("{}: {previous:?} -> Disposed", self.label);
            self.emit_failed(
                ConnectionFailureType::ConnectionDisposed,
                closed_connection_error(),
            );
        }
        old
    }

    fn connection_broke(&self, connection_id: u64, error: RedisError) {
        let current = self.handle.load();
        if current.id() != connection_id {
            trace!("{}: ignoring failure of a replaced connection", self.label);
            return;
        }
        if !self.transition(ConnectionState::Connected, ConnectionState::Faulted) {
            return;
        }
        let displaced = self
            .handle
            .compare_and_swap(&current, Arc::new(ConnectionHandle::null()));
        if Arc::ptr_eq(&displaced, &current) {
            displaced.dispose();
        }

        let failure = match error.connection_failure() {
            Some(failure) => failure,
            None => ConnectionFailureType::SocketFailure,
        };
        warn!("{}: connection broke, {failure}: {error}", self.label);
        self.emit_failed(failure, error);
    }
}

/// Receives runtime failures of one connection.
///
/// Transports hand the failure of a live connection to the sink it was subscribed with. A
/// report moves the owning slot from `Connected` to `Faulted`, unless the connection was
/// already replaced.
#[derive(Clone)]
pub struct ErrorSink {
    slot: Weak<SlotInner>,
    connection_id: u64,
}

impl ErrorSink {
    /// Reports that the connection broke.
    pub fn report(&self, error: RedisError) {
        if let Some(slot) = self.slot.upgrade() {
            slot.connection_broke(self.connection_id, error);
        }
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}
