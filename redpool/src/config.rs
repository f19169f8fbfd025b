//! # Pool Configuration
//!
//! Purpose: Describe where the store lives and how the pool behaves, in a
//! form that can come from code (builder methods) or from JSON (serde).
//!
//! ## Design Principles
//! 1. **Dedicated Fields Win**: Address and database live in their own fields;
//!    the same keys are stripped from the pass-through options.
//! 2. **Milliseconds on the Wire**: Durations are stored as `*_ms` integers so
//!    the serialized form stays flat; accessors hand out `Duration`s.
//! 3. **Validate Once**: `validate` runs before a pool is built.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::ConnectionError;

/// Pass-through keys controlled exclusively by dedicated config fields.
pub const RESERVED_OPTION_KEYS: [&str; 5] = ["host", "port", "path", "url", "db"];

pub const DEFAULT_ID_PREFIX: &str = "redpool-";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 3_600_000;
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000;

/// Where the store listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Pool and connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Prefix for the pool's diagnostic identifier.
    #[serde(alias = "idPrefix")]
    pub id_prefix: String,
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Unix socket path; overrides host and port when set.
    #[serde(alias = "unixSocketPath")]
    pub unix_socket_path: Option<PathBuf>,
    /// Hard ceiling on idle + leased + creating connections.
    #[serde(alias = "maxConnections")]
    pub max_connections: usize,
    /// Idle duration after which a connection may be evicted.
    #[serde(alias = "idleTimeoutMs")]
    pub idle_timeout_ms: u64,
    /// Run the background idle sweep.
    #[serde(alias = "evictIdle")]
    pub evict_idle: bool,
    /// Database selected on every new connection.
    pub database: u32,
    /// Extra connection options (`password`, `username`, `client_name`).
    #[serde(alias = "passThroughOptions")]
    pub options: Map<String, JsonValue>,
    /// Give up on a queued acquire after this long. `None` waits forever.
    #[serde(alias = "acquireTimeoutMs")]
    pub acquire_timeout_ms: Option<u64>,
    /// Period of the idle sweep.
    #[serde(alias = "reapIntervalMs")]
    pub reap_interval_ms: u64,
    /// Transport connect timeout.
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            unix_socket_path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            evict_idle: true,
            database: 0,
            options: Map::new(),
            acquire_timeout_ms: None,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
            connect_timeout_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConnectionError> {
        let config: PoolConfig = serde_json::from_str(text)
            .map_err(|err| ConnectionError::InvalidConfig(err.to_string()))?;
        Ok(config.normalized())
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket_path = Some(path.into());
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn evict_idle(mut self, enabled: bool) -> Self {
        self.evict_idle = enabled;
        self
    }

    pub fn database(mut self, index: u32) -> Self {
        self.database = index;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Adds a pass-through option. Reserved keys are dropped by `normalized`.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Strips address and database keys from the pass-through options.
    pub fn normalized(mut self) -> Self {
        for key in RESERVED_OPTION_KEYS {
            if self.options.remove(key).is_some() {
                debug!(key, "dropping reserved pass-through option");
            }
        }
        self
    }

    /// Checks values that would make the pool unusable.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.max_connections == 0 {
            return Err(ConnectionError::InvalidConfig(
                "max_connections must be positive".into(),
            ));
        }
        if self.evict_idle && self.reap_interval_ms == 0 {
            return Err(ConnectionError::InvalidConfig(
                "reap_interval_ms must be positive when evict_idle is set".into(),
            ));
        }
        if self.unix_socket_path.is_none() && self.host.is_empty() {
            return Err(ConnectionError::InvalidConfig("host is empty".into()));
        }
        Ok(())
    }

    /// Resolved address; the socket path takes precedence over host/port.
    pub fn address(&self) -> Address {
        match &self.unix_socket_path {
            Some(path) => Address::Unix(path.clone()),
            None => Address::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
        }
    }

    pub fn idle_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reap_interval_duration(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn acquire_timeout_duration(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// `password`, falling back to the legacy `auth_pass` key.
    pub fn password(&self) -> Option<&str> {
        self.option_str("password")
            .or_else(|| self.option_str("auth_pass"))
    }

    pub fn username(&self) -> Option<&str> {
        self.option_str("username")
    }

    pub fn client_name(&self) -> Option<&str> {
        self.option_str("client_name")
    }

    fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(JsonValue::as_str)
    }
}
