use std::fmt;
use std::str::FromStr;

use crate::errors::{ErrorKind, RedisError};

/// Loopback address used for empty endpoint lists and `localhost` aliases.
pub const LOOPBACK: &str = "127.0.0.1";

/// Default port of a plain-text server.
pub const DEFAULT_PORT: u16 = 6379;
/// Default port of a TLS-terminated server.
pub const DEFAULT_TLS_PORT: u16 = 6380;
/// Default port of a sentinel.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// The kind of deployment the configured endpoints belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ServerType {
    /// One or more independent servers, possibly primary and replicas.
    #[default]
    Standalone,
    /// Sentinel servers, monitoring a named service.
    Sentinel,
    /// Members of a cluster.
    Cluster,
}

impl ServerType {
    /// The port assumed for an endpoint configured without one.
    pub fn default_port(&self, ssl: bool) -> u16 {
        match self {
            ServerType::Sentinel => DEFAULT_SENTINEL_PORT,
            _ if ssl => DEFAULT_TLS_PORT,
            _ => DEFAULT_PORT,
        }
    }
}

/// Immutable host/port identity of a server.
///
/// A port of `0` means "not specified"; [`normalize_endpoints`] replaces it with the
/// default port of the deployment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint. `port` may be `0` to request the default port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port, `0` if not specified yet.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn is_loopback_alias(&self) -> bool {
        self.host == "." || self.host.eq_ignore_ascii_case("localhost")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = RedisError;

    /// Parses `host`, `host:port`, `[ipv6]` or `[ipv6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || {
            RedisError::from((
                ErrorKind::InvalidClientConfig,
                "Invalid endpoint",
                s.to_string(),
            ))
        };
        if s.is_empty() {
            return Err(invalid());
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            match rest.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if rest.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else {
            match s.rsplit_once(':') {
                // a bare IPv6 address has more than one colon and no port
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Endpoint::new(host, port))
    }
}

/// Normalizes a configured endpoint list into the endpoints nodes are created for.
///
/// An empty list becomes a single loopback endpoint, `.` and `localhost` are rewritten to
/// the loopback address, unspecified ports receive the deployment's default port, and
/// duplicates are removed, keeping the first occurrence.
pub fn normalize_endpoints(endpoints: &[Endpoint], server_type: ServerType, ssl: bool) -> Vec<Endpoint> {
    let default_port = server_type.default_port(ssl);
    if endpoints.is_empty() {
        return vec![Endpoint::new(LOOPBACK, default_port)];
    }

    let mut normalized: Vec<Endpoint> = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let host = if endpoint.is_loopback_alias() {
            LOOPBACK.to_string()
        } else {
            endpoint.host.clone()
        };
        let port = if endpoint.port == 0 {
            default_port
        } else {
            endpoint.port
        };
        let endpoint = Endpoint::new(host, port);
        if !normalized.contains(&endpoint) {
            normalized.push(endpoint);
        }
    }
    normalized
}
