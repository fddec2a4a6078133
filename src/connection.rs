//! Connection lifecycle.
//!
//! The `ConnectionManager` owns the single process-wide MongoDB connection and
//! its state machine:
//!
//! ```text
//! Disconnected --configure--> Connecting --ok--> Connected
//!                                 |                  |
//!                                 +--err--> Failed   +--disconnect--> Disconnected
//! ```
//!
//! `configure` is accepted from any state except `Connecting`. Tool calls borrow
//! the live handle through a [`ConnectionLease`]: an `Arc` clone plus a permit
//! from a semaphore sized to the pool. Replacing or dropping the connection
//! never cancels in-flight calls; the old client is released once the last
//! lease is returned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Settings;
use crate::convert::{get_optional_bool, get_optional_string, get_optional_u64};
use crate::driver::{Connector, MongoBackend};
use crate::error::{McpError, Result};

/// Grace period on top of the connect timeout so the driver's own
/// server-selection error is reported ahead of ours.
const CONNECT_GRACE: Duration = Duration::from_millis(1_000);

/// Everything needed to open a connection.
///
/// Immutable once an attempt is made; reconfiguration replaces it wholesale.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication, never serialized
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Authentication database
    pub auth_source: String,
    /// Default database
    pub database: Option<String>,
    /// Connect over TLS
    pub tls: bool,
    /// Accept invalid server certificates
    pub tls_allow_invalid_certificates: bool,
    /// Connect / server-selection timeout
    pub connect_timeout_ms: u64,
    /// Per-call deadline
    pub query_timeout_ms: u64,
    /// Driver pool size and concurrent call limit
    pub max_pool_size: u32,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("auth_source", &self.auth_source)
            .field("database", &self.database)
            .field("tls", &self.tls)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .field("max_pool_size", &self.max_pool_size)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// `localhost:27017`, no credentials, timeouts and pool from settings.
    pub fn with_defaults(settings: &Settings) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            username: None,
            password: None,
            auth_source: "admin".to_string(),
            database: None,
            tls: false,
            tls_allow_invalid_certificates: false,
            connect_timeout_ms: settings.connection_timeout_ms,
            query_timeout_ms: settings.query_timeout_ms,
            max_pool_size: settings.max_connections,
        }
    }

    /// Build from `mongodb_configure_connection` arguments, filling gaps from settings.
    pub fn from_args(args: &Map<String, JsonValue>, settings: &Settings) -> Result<Self> {
        let mut descriptor = Self::with_defaults(settings);

        if let Some(host) = get_optional_string(args, "host") {
            descriptor.host = host;
        }
        if let Some(port) = get_optional_u64(args, "port") {
            descriptor.port = u16::try_from(port)
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| McpError::invalid("port", "must be between 1 and 65535"))?;
        }
        descriptor.username = get_optional_string(args, "username");
        descriptor.password = get_optional_string(args, "password");
        if descriptor.username.is_some() != descriptor.password.is_some() {
            let missing = if descriptor.username.is_none() { "username" } else { "password" };
            return Err(McpError::invalid(missing, "username and password must be given together"));
        }
        if let Some(source) = get_optional_string(args, "auth_source") {
            descriptor.auth_source = source;
        }
        descriptor.database = get_optional_string(args, "database");
        descriptor.tls = get_optional_bool(args, "tls").unwrap_or(false);
        descriptor.tls_allow_invalid_certificates =
            get_optional_bool(args, "tls_allow_invalid_certificates").unwrap_or(false);
        if let Some(ms) = get_optional_u64(args, "connect_timeout_ms") {
            descriptor.connect_timeout_ms = ms;
        }
        if let Some(ms) = get_optional_u64(args, "query_timeout_ms") {
            descriptor.query_timeout_ms = ms;
        }
        let pool = get_optional_u64(args, "max_pool_size")
            .or_else(|| get_optional_u64(args, "max_connections"));
        if let Some(pool) = pool {
            descriptor.max_pool_size = u32::try_from(pool)
                .map_err(|_| McpError::invalid("max_pool_size", "is out of range"))?;
        }

        Ok(descriptor)
    }

    /// JSON view with the password masked.
    pub fn redacted(&self) -> JsonValue {
        let mut json = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let (Some(obj), Some(_)) = (json.as_object_mut(), &self.password) {
            obj.insert("password".to_string(), JsonValue::String("***".to_string()));
        }
        json
    }

    /// Per-call deadline.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection configured
    Disconnected,
    /// An attempt is in progress
    Connecting,
    /// A live handle is available
    Connected,
    /// The last attempt failed
    Failed(String),
}

impl ConnectionState {
    /// Lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

/// Snapshot returned by [`ConnectionManager::status`].
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Descriptor of the current or last attempted connection
    pub descriptor: Option<ConnectionDescriptor>,
}

/// An established connection.
pub struct LiveConnection {
    backend: Arc<dyn MongoBackend>,
    descriptor: ConnectionDescriptor,
    permits: Arc<Semaphore>,
}

impl LiveConnection {
    fn new(backend: Arc<dyn MongoBackend>, descriptor: ConnectionDescriptor) -> Self {
        let permits = Arc::new(Semaphore::new(descriptor.max_pool_size.max(1) as usize));
        Self {
            backend,
            descriptor,
            permits,
        }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        tracing::info!(
            host = %self.descriptor.host,
            port = self.descriptor.port,
            "Closing MongoDB connection"
        );
    }
}

/// A borrowed connection, valid for one tool call.
pub struct ConnectionLease {
    live: Arc<LiveConnection>,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLease {
    /// The backend handle.
    pub fn backend(&self) -> &dyn MongoBackend {
        self.live.backend.as_ref()
    }

    /// Descriptor the connection was opened with.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.live.descriptor
    }

    /// Per-call deadline.
    pub fn query_timeout(&self) -> Duration {
        self.live.descriptor.query_timeout()
    }
}

enum State {
    Disconnected,
    Connecting {
        attempt: u64,
        descriptor: ConnectionDescriptor,
    },
    Connected(Arc<LiveConnection>),
    Failed {
        descriptor: ConnectionDescriptor,
        reason: String,
    },
}

/// Owner of the process-wide connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: Settings,
    state: RwLock<State>,
    attempts: AtomicU64,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(connector: Arc<dyn Connector>, settings: Settings) -> Self {
        Self {
            connector,
            settings,
            state: RwLock::new(State::Disconnected),
            attempts: AtomicU64::new(0),
        }
    }

    /// Startup settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        match &*self.read_state() {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting { .. } => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
            State::Failed { reason, .. } => ConnectionState::Failed(reason.clone()),
        }
    }

    /// Whether a live handle is available.
    pub fn is_connected(&self) -> bool {
        matches!(&*self.read_state(), State::Connected(_))
    }

    /// Deadline for the next tool call.
    pub fn query_timeout(&self) -> Duration {
        match &*self.read_state() {
            State::Connected(live) => live.descriptor.query_timeout(),
            _ => self.settings.query_timeout(),
        }
    }

    /// Pure read of state and descriptor.
    pub fn status(&self) -> ConnectionStatus {
        let (state, descriptor) = match &*self.read_state() {
            State::Disconnected => (ConnectionState::Disconnected, None),
            State::Connecting { descriptor, .. } => {
                (ConnectionState::Connecting, Some(descriptor.clone()))
            }
            State::Connected(live) => (ConnectionState::Connected, Some(live.descriptor.clone())),
            State::Failed { descriptor, reason } => {
                (ConnectionState::Failed(reason.clone()), Some(descriptor.clone()))
            }
        };
        ConnectionStatus { state, descriptor }
    }

    /// Borrow the live connection, waiting for a free slot in the pool.
    pub async fn acquire(&self) -> Result<ConnectionLease> {
        let live = match &*self.read_state() {
            State::Connected(live) => Arc::clone(live),
            _ => return Err(McpError::NotConnected),
        };
        lease(live).await
    }

    /// Replace the connection with a new one opened from `descriptor`.
    ///
    /// Any previous connection is released first. On failure the state becomes
    /// `Failed` and stays there until the next `configure`.
    pub async fn configure(&self, descriptor: ConnectionDescriptor) -> Result<ConnectionLease> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = {
            let mut state = self.write_state();
            if matches!(&*state, State::Connecting { .. }) {
                return Err(McpError::Operation(
                    "a connection attempt is already in progress".to_string(),
                ));
            }
            std::mem::replace(
                &mut *state,
                State::Connecting {
                    attempt,
                    descriptor: descriptor.clone(),
                },
            )
        };
        if let State::Connected(live) = previous {
            tracing::info!(in_flight = Arc::strong_count(&live) - 1, "Releasing previous connection");
        }

        tracing::info!(connection = ?descriptor, attempt, "Configuring MongoDB connection");

        let deadline = Duration::from_millis(descriptor.connect_timeout_ms) + CONNECT_GRACE;
        let outcome = match tokio::time::timeout(deadline, self.connector.connect(&descriptor)).await {
            Ok(Ok(backend)) => Ok(backend),
            Ok(Err(McpError::Connection(reason))) => Err(McpError::Connection(reason)),
            Ok(Err(other)) => Err(McpError::Connection(other.to_string())),
            Err(_) => Err(McpError::Connection(format!(
                "timed out after {} ms connecting to {}:{}",
                descriptor.connect_timeout_ms, descriptor.host, descriptor.port
            ))),
        };

        let live = {
            let mut state = self.write_state();
            let current = matches!(&*state, State::Connecting { attempt: a, .. } if *a == attempt);
            if !current {
                tracing::warn!(attempt, "Connection attempt superseded before completion");
                return Err(McpError::Connection(
                    "connection attempt was superseded by a newer configure or disconnect"
                        .to_string(),
                ));
            }

            match outcome {
                Ok(backend) => {
                    let live = Arc::new(LiveConnection::new(backend, descriptor));
                    *state = State::Connected(Arc::clone(&live));
                    live
                }
                Err(err) => {
                    tracing::error!(error = %err, attempt, "MongoDB connection failed");
                    *state = State::Failed {
                        descriptor,
                        reason: err.to_string(),
                    };
                    return Err(err);
                }
            }
        };

        tracing::info!(attempt, "MongoDB connection established");
        lease(live).await
    }

    /// Probe the live connection without changing state.
    pub async fn test(&self) -> Result<ConnectionLease> {
        let lease = self.acquire().await?;
        let deadline = lease.query_timeout();
        match tokio::time::timeout(deadline, lease.backend().ping()).await {
            Ok(Ok(())) => Ok(lease),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "MongoDB connection test failed");
                Err(match err {
                    McpError::Connection(reason) => McpError::Connection(reason),
                    other => McpError::Connection(other.to_string()),
                })
            }
            Err(_) => Err(McpError::Connection(format!(
                "ping timed out after {} ms",
                deadline.as_millis()
            ))),
        }
    }

    /// Drop the connection. Returns whether one was live.
    pub fn disconnect(&self) -> bool {
        let previous = std::mem::replace(&mut *self.write_state(), State::Disconnected);
        let was_connected = matches!(previous, State::Connected(_));
        tracing::info!(was_connected, "Disconnected from MongoDB");
        was_connected
    }
}

async fn lease(live: Arc<LiveConnection>) -> Result<ConnectionLease> {
    let permit = Arc::clone(&live.permits)
        .acquire_owned()
        .await
        .map_err(|_| McpError::Internal("connection pool closed".to_string()))?;
    Ok(ConnectionLease {
        live,
        _permit: permit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: JsonValue) -> Map<String, JsonValue> {
        match v {
            JsonValue::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_descriptor_defaults() {
        let d = ConnectionDescriptor::from_args(&Map::new(), &Settings::default()).unwrap();
        assert_eq!(d.host, "localhost");
        assert_eq!(d.port, 27017);
        assert_eq!(d.auth_source, "admin");
        assert_eq!(d.max_pool_size, 10);
        assert_eq!(d.query_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_descriptor_requires_credential_pair() {
        let err = ConnectionDescriptor::from_args(&args(json!({"username": "app"})), &Settings::default())
            .unwrap_err();
        assert!(matches!(err, McpError::Validation { ref field, .. } if field == "password"));
    }

    #[test]
    fn test_max_connections_alias() {
        let d = ConnectionDescriptor::from_args(&args(json!({"max_connections": 4})), &Settings::default())
            .unwrap();
        assert_eq!(d.max_pool_size, 4);
    }

    #[test]
    fn test_redacted_hides_password() {
        let d = ConnectionDescriptor::from_args(
            &args(json!({"username": "app", "password": "hunter2"})),
            &Settings::default(),
        )
        .unwrap();
        let json = d.redacted();
        assert_eq!(json["password"], "***");
        assert_eq!(json["username"], "app");
        assert!(!format!("{:?}", d).contains("hunter2"));
        assert!(!json.to_string().contains("hunter2"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::Failed("x".into()).as_str(), "failed");
        assert_eq!(ConnectionState::Connected.as_str(), "connected");
    }
}
