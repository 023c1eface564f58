use futures_util::future::{self, FutureExt};

use crate::cmd::{cmd, Cmd};
use crate::config::ConfigurationOptions;
use crate::connection::ConnectionHandle;
use crate::endpoint::Endpoint;
use crate::errors::{ErrorKind, RedisError, ServerErrorKind};
use crate::message::Message;
use crate::types::{ProtocolVersion, RedisFuture, RedisResult, Value};

/// The replication role a server reported during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub enum ServerRole {
    /// Accepts writes.
    Primary,
    /// Replicates a primary, read-only.
    Replica,
    /// The server didn't tell.
    #[default]
    Unknown,
}

impl ServerRole {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "master" | "primary" => ServerRole::Primary,
            "slave" | "replica" => ServerRole::Replica,
            _ => ServerRole::Unknown,
        }
    }
}

/// What the handshake learned about the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// The server version, e.g. `7.2.4`.
    pub version: Option<String>,
    /// The replication role.
    pub role: ServerRole,
    /// The negotiated protocol.
    pub protocol: ProtocolVersion,
}

/// The step that makes a freshly opened connection usable: protocol negotiation,
/// authentication and client naming.
///
/// A failed handshake fails the connection attempt.
pub trait Handshake: Send + Sync + 'static {
    /// Runs the handshake over `connection`, which is connected to `endpoint`.
    fn handshake<'a>(
        &'a self,
        connection: &'a ConnectionHandle,
        endpoint: &'a Endpoint,
    ) -> RedisFuture<'a, ServerInfo>;
}

/// A handshake that sends nothing, for transports that negotiate on their own.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHandshake;

impl Handshake for NoHandshake {
    fn handshake<'a>(
        &'a self,
        _connection: &'a ConnectionHandle,
        _endpoint: &'a Endpoint,
    ) -> RedisFuture<'a, ServerInfo> {
        future::ready(Ok(ServerInfo::default())).boxed()
    }
}

/// The default handshake.
///
/// With RESP3 a single `HELLO 3` negotiates the protocol, authenticates and names the
/// client. With RESP2 `AUTH` and `CLIENT SETNAME` are sent when configured, followed by
/// `ROLE`, whose failure is tolerated.
#[derive(Clone, Debug, Default)]
pub struct StandardHandshake {
    protocol: ProtocolVersion,
    user: Option<String>,
    password: Option<String>,
    client_name: Option<String>,
}

impl StandardHandshake {
    /// Creates a handshake negotiating `protocol`, without credentials or client name.
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self {
            protocol,
            ..Default::default()
        }
    }

    /// Creates the handshake described by the options.
    pub fn from_options(options: &ConfigurationOptions) -> Self {
        Self {
            protocol: options.protocol(),
            user: options.user().map(str::to_string),
            password: options.password().map(str::to_string),
            client_name: options.client_name().map(str::to_string),
        }
    }

    /// Sets the credentials sent during the handshake.
    pub fn set_credentials(mut self, user: Option<String>, password: impl Into<String>) -> Self {
        self.user = user;
        self.password = Some(password.into());
        self
    }

    /// Sets the client name.
    pub fn set_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    async fn resp3(&self, connection: &ConnectionHandle) -> RedisResult<ServerInfo> {
        let mut hello = cmd("HELLO");
        hello.arg(3);
        if let Some(password) = &self.password {
            hello
                .arg("AUTH")
                .arg(self.user.as_deref().unwrap_or("default"))
                .arg(password);
        }
        if let Some(name) = &self.client_name {
            hello.arg("SETNAME").arg(name);
        }

        let reply = query(connection, hello).await.map_err(hello_error)?;
        let mut info = ServerInfo {
            protocol: ProtocolVersion::RESP3,
            ..Default::default()
        };
        if let Some(version) = reply.map_get("version").and_then(Value::as_str) {
            info.version = Some(version.to_string());
        }
        if let Some(role) = reply.map_get("role").and_then(Value::as_str) {
            info.role = ServerRole::from_name(role);
        }
        if let Some(Value::Int(2)) = reply.map_get("proto") {
            info.protocol = ProtocolVersion::RESP2;
        }
        Ok(info)
    }

    async fn resp2(&self, connection: &ConnectionHandle) -> RedisResult<ServerInfo> {
        if let Some(password) = &self.password {
            self.authenticate(connection, password).await?;
        }
        if let Some(name) = &self.client_name {
            let mut setname = cmd("CLIENT");
            setname.arg("SETNAME").arg(name);
            query(connection, setname).await?;
        }

        let mut info = ServerInfo::default();
        match query(connection, cmd("ROLE")).await {
            Ok(Value::Array(items)) => {
                if let Some(role) = items.first().and_then(Value::as_str) {
                    info.role = ServerRole::from_name(role);
                }
            }
            Ok(other) => log::debug!("Unexpected ROLE reply {other:?}"),
            Err(err) if err.is_unrecoverable_error() => return Err(err),
            Err(err) => log::debug!("ROLE failed, role stays unknown: {err}"),
        }
        Ok(info)
    }

    async fn authenticate(&self, connection: &ConnectionHandle, password: &str) -> RedisResult<()> {
        let mut auth = cmd("AUTH");
        if let Some(user) = &self.user {
            auth.arg(user);
        }
        auth.arg(password);
        let err = match query(connection, auth).await {
            Ok(Value::Okay) => return Ok(()),
            Ok(_) => {
                return Err(RedisError::from((
                    ErrorKind::AuthenticationFailed,
                    "Server refused to authenticate, returned a reply other than OK",
                )))
            }
            Err(err) => err,
        };

        // servers older than 6 only know the single argument form
        let legacy = self.user.is_some()
            && err
                .detail()
                .is_some_and(|detail| detail.contains("wrong number of arguments for 'auth'"));
        if !legacy {
            return Err(auth_error(err));
        }
        let mut auth = cmd("AUTH");
        auth.arg(password);
        match query(connection, auth).await {
            Ok(Value::Okay) => Ok(()),
            Ok(_) => Err(RedisError::from((
                ErrorKind::AuthenticationFailed,
                "Password authentication failed",
            ))),
            Err(err) => Err(auth_error(err)),
        }
    }
}

impl Handshake for StandardHandshake {
    fn handshake<'a>(
        &'a self,
        connection: &'a ConnectionHandle,
        endpoint: &'a Endpoint,
    ) -> RedisFuture<'a, ServerInfo> {
        async move {
            log::trace!("Handshake with {endpoint} using {:?}", self.protocol);
            if self.protocol.supports_resp3() {
                self.resp3(connection).await
            } else {
                self.resp2(connection).await
            }
        }
        .boxed()
    }
}

async fn query(connection: &ConnectionHandle, cmd: Cmd) -> RedisResult<Value> {
    let message = Message::internal(cmd);
    connection.write(&message).await
}

fn is_auth_rejection(err: &RedisError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::AuthenticationFailed
            | ErrorKind::ServerError(ServerErrorKind::NoAuth)
            | ErrorKind::ServerError(ServerErrorKind::NoPerm)
    ) || err.code() == Some("ERR")
        && err
            .detail()
            .is_some_and(|detail| detail.contains("invalid password") || detail.contains("AUTH"))
}

fn auth_error(err: RedisError) -> RedisError {
    if !is_auth_rejection(&err) {
        return err;
    }
    RedisError::from((
        ErrorKind::AuthenticationFailed,
        "Password authentication failed",
        err.detail().unwrap_or_default().to_string(),
    ))
}

fn hello_error(err: RedisError) -> RedisError {
    if err
        .detail()
        .is_some_and(|detail| detail.starts_with("unknown command `HELLO`"))
    {
        return RedisError::from((
            ErrorKind::InvalidClientConfig,
            "Server doesn't support HELLO, RESP3 cannot be used",
        ));
    }
    auth_error(err)
}
