use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::{Endpoint, ServerType};
use crate::errors::{ErrorKind, RedisError};
use crate::events::EventSender;
use crate::log_sink::LogSink;
use crate::retry::RetryPolicy;
use crate::types::ProtocolVersion;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Options a [`crate::Multiplexer`] is connected with.
///
/// The options are consumed by `connect` and never change afterwards.
///
/// ```rust
/// use std::time::Duration;
/// use redis_mux::ConfigurationOptions;
///
/// let options: ConfigurationOptions = "cache-1:6379,cache-2,syncTimeout=2000".parse().unwrap();
/// let options = options.set_client_name("billing");
/// assert_eq!(options.endpoints().len(), 2);
/// assert_eq!(options.sync_timeout(), Duration::from_millis(2000));
/// ```
#[derive(Clone)]
pub struct ConfigurationOptions {
    endpoints: Vec<Endpoint>,
    default_database: i64,
    sync_timeout: Duration,
    async_timeout: Duration,
    connect_timeout: Duration,
    server_type: ServerType,
    service_name: Option<String>,
    ssl: bool,
    client_name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    protocol: ProtocolVersion,
    retry_queue_max_length: usize,
    retry_policy: RetryPolicy,
    heartbeat_interval: Duration,
    reconnect_on_heartbeat: bool,
    log_sink: Option<LogSink>,
    event_sender: Option<Arc<dyn EventSender>>,
}

impl Default for ConfigurationOptions {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            default_database: 0,
            sync_timeout: DEFAULT_TIMEOUT,
            async_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            server_type: ServerType::Standalone,
            service_name: None,
            ssl: false,
            client_name: None,
            user: None,
            password: None,
            protocol: ProtocolVersion::default(),
            retry_queue_max_length: usize::MAX,
            retry_policy: RetryPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_on_heartbeat: true,
            log_sink: None,
            event_sender: None,
        }
    }
}

impl fmt::Debug for ConfigurationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationOptions")
            .field("endpoints", &self.endpoints)
            .field("default_database", &self.default_database)
            .field("sync_timeout", &self.sync_timeout)
            .field("async_timeout", &self.async_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("server_type", &self.server_type)
            .field("service_name", &self.service_name)
            .field("ssl", &self.ssl)
            .field("client_name", &self.client_name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("protocol", &self.protocol)
            .field("retry_queue_max_length", &self.retry_queue_max_length)
            .field("retry_policy", &self.retry_policy)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect_on_heartbeat", &self.reconnect_on_heartbeat)
            .field("log_sink", &self.log_sink.is_some())
            .field("event_sender", &self.event_sender.is_some())
            .finish()
    }
}

impl ConfigurationOptions {
    /// Creates options with the defaults: no endpoints, database 0, five second timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint. A port of `0` selects the default port of the deployment.
    pub fn add_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Replaces the endpoint list.
    pub fn set_endpoints(mut self, endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints = endpoints.into_iter().collect();
        self
    }

    /// Sets the database commands are executed against when no other database is requested.
    pub fn set_default_database(mut self, database: i64) -> Self {
        self.default_database = database;
        self
    }

    /// Sets how long blocking waits last before failing with a timeout.
    pub fn set_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Sets how long a command may stay in the retry queue before it fails with a timeout.
    pub fn set_async_timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout = timeout;
        self
    }

    /// Each connection attempt to a server will time out after `timeout`.
    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the kind of deployment the endpoints belong to.
    pub fn set_server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self
    }

    /// Sets the service monitored by the configured sentinels, and switches to sentinel mode.
    pub fn set_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self.server_type = ServerType::Sentinel;
        self
    }

    /// Selects TLS transports, which changes the default port.
    pub fn set_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Sets the name announced with `CLIENT SETNAME` during the handshake.
    pub fn set_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the ACL user used to authenticate.
    pub fn set_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password used to authenticate.
    pub fn set_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the protocol version negotiated during the handshake.
    pub fn set_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Bounds the number of failed commands waiting to be retried.
    /// `0` disables retries altogether.
    pub fn set_retry_queue_max_length(mut self, length: usize) -> Self {
        self.retry_queue_max_length = length;
        self
    }

    /// Sets the policy applied to commands that don't carry retry flags of their own.
    pub fn set_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the interval of the background task that sweeps timeouts and reconnects.
    ///
    /// Intervals shorter than one millisecond are raised to one millisecond.
    pub fn set_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Whether the background task reconnects faulted nodes.
    pub fn set_reconnect_on_heartbeat(mut self, reconnect: bool) -> Self {
        self.reconnect_on_heartbeat = reconnect;
        self
    }

    /// Sets a sink receiving human-readable progress lines while connecting.
    pub fn set_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Sets the sender connection events are forwarded to.
    ///
    /// ```rust
    /// let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    /// let options = redis_mux::ConfigurationOptions::new().set_event_sender(tx);
    /// ```
    pub fn set_event_sender(mut self, sender: impl EventSender) -> Self {
        self.event_sender = Some(Arc::new(sender));
        self
    }

    /// The configured endpoints, before normalization.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The default database.
    pub fn default_database(&self) -> i64 {
        self.default_database
    }

    /// The blocking wait timeout.
    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// The timeout of queued commands.
    pub fn async_timeout(&self) -> Duration {
        self.async_timeout
    }

    /// The timeout of a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// The kind of deployment.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The sentinel service name, if any.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Whether TLS transports are used.
    pub fn ssl(&self) -> bool {
        self.ssl
    }

    /// The client name, if any.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// The ACL user, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The password, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The protocol version.
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// The retry queue bound.
    pub fn retry_queue_max_length(&self) -> usize {
        self.retry_queue_max_length
    }

    /// The default retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// The heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Whether heartbeats reconnect faulted nodes.
    pub fn reconnect_on_heartbeat(&self) -> bool {
        self.reconnect_on_heartbeat
    }

    /// The progress sink, if any.
    pub fn log_sink(&self) -> Option<&LogSink> {
        self.log_sink.as_ref()
    }

    pub(crate) fn event_sender(&self) -> Option<&Arc<dyn EventSender>> {
        self.event_sender.as_ref()
    }
}

fn invalid_value(key: &str) -> RedisError {
    RedisError::from((
        ErrorKind::InvalidClientConfig,
        "Invalid configuration value",
        key.to_string(),
    ))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, RedisError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid_value(key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, RedisError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid_value(key)),
    }
}

impl FromStr for ConfigurationOptions {
    type Err = RedisError;

    /// Parses the comma separated configuration string form, where every entry is either an
    /// endpoint or a `key=value` option. Timeouts are given in milliseconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = ConfigurationOptions::default();
        for entry in s.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                options.endpoints.push(entry.parse()?);
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key.to_ascii_lowercase().as_str() {
                "defaultdatabase" => {
                    options.default_database = value.parse().map_err(|_| invalid_value(key))?
                }
                "synctimeout" => options.sync_timeout = parse_millis(key, value)?,
                "asynctimeout" => options.async_timeout = parse_millis(key, value)?,
                "connecttimeout" => options.connect_timeout = parse_millis(key, value)?,
                "heartbeatinterval" => {
                    let interval = parse_millis(key, value)?;
                    if interval.is_zero() {
                        return Err(invalid_value(key));
                    }
                    options.heartbeat_interval = interval;
                }
                "ssl" => options.ssl = parse_bool(key, value)?,
                "servicename" => options = options.set_service_name(value),
                "name" => options.client_name = Some(value.to_string()),
                "user" => options.user = Some(value.to_string()),
                "password" => options.password = Some(value.to_string()),
                "protocol" => {
                    options.protocol = match value.to_ascii_lowercase().as_str() {
                        "resp2" | "2" => ProtocolVersion::RESP2,
                        "resp3" | "3" => ProtocolVersion::RESP3,
                        _ => return Err(invalid_value(key)),
                    }
                }
                "retryqueuelength" => {
                    options.retry_queue_max_length =
                        value.parse().map_err(|_| invalid_value(key))?
                }
                _ => {
                    return Err(RedisError::from((
                        ErrorKind::InvalidClientConfig,
                        "Unknown configuration option",
                        key.to_string(),
                    )))
                }
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ConfigurationOptions::new();
        assert!(options.endpoints().is_empty());
        assert_eq!(options.sync_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(options.retry_queue_max_length(), usize::MAX);
        assert_eq!(options.retry_policy(), RetryPolicy::RetryIfNotSent);
        assert!(options.reconnect_on_heartbeat());
    }

    #[test]
    fn parses_configuration_string() {
        let options: ConfigurationOptions =
            "primary:6379, [::1]:7000,defaultDatabase=3,ssl=true,name=app,protocol=resp3,retryQueueLength=10"
                .parse()
                .unwrap();
        assert_eq!(
            options.endpoints(),
            &[Endpoint::new("primary", 6379), Endpoint::new("::1", 7000)]
        );
        assert_eq!(options.default_database(), 3);
        assert!(options.ssl());
        assert_eq!(options.client_name(), Some("app"));
        assert_eq!(options.protocol(), ProtocolVersion::RESP3);
        assert_eq!(options.retry_queue_max_length(), 10);
    }

    #[test]
    fn service_name_selects_sentinel() {
        let options: ConfigurationOptions = "sentinel-1,serviceName=mymaster".parse().unwrap();
        assert_eq!(options.server_type(), ServerType::Sentinel);
        assert_eq!(options.service_name(), Some("mymaster"));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let err = "localhost,frobnicate=1".parse::<ConfigurationOptions>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);
        let err = "syncTimeout=soon".parse::<ConfigurationOptions>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);
    }

    #[test]
    fn heartbeat_interval_is_never_zero() {
        let err = "127.0.0.1:6379,heartbeatInterval=0"
            .parse::<ConfigurationOptions>()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);

        let options: ConfigurationOptions = "heartbeatInterval=250".parse().unwrap();
        assert_eq!(options.heartbeat_interval(), Duration::from_millis(250));
        let options = ConfigurationOptions::new().set_heartbeat_interval(Duration::ZERO);
        assert_eq!(options.heartbeat_interval(), MIN_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn debug_redacts_password() {
        let options = ConfigurationOptions::new().set_password("hunter2");
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
