//! Client configuration.
//!
//! Read once per process from the environment:
//!
//! | Variable             | Default     | Accepted            |
//! |----------------------|-------------|---------------------|
//! | `TF_WORKER_HOST`     | `localhost` | any non-empty host  |
//! | `TF_WORKER_PORT`     | 18515       | 1..=65535           |
//! | `TF_CONNECT_TIMEOUT` | 30 (s)      | > 0                 |
//! | `TF_IO_TIMEOUT`      | 60 (s)      | > 0                 |
//! | `TF_DEBUG`           | off         | `1` turns it on     |
//!
//! Values outside the accepted range are ignored and the default is kept.

use std::sync::OnceLock;
use std::time::Duration;

use crate::protocol::DEFAULT_PORT;

/// Default coalescing buffer capacity (64 KiB).
pub const DEFAULT_COALESCE_CAPACITY: usize = 64 * 1024;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default socket I/O timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Where and how a session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub debug: bool,
    /// Bytes of fire-and-forget frames held before a forced flush.
    pub coalesce_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            debug: false,
            coalesce_capacity: DEFAULT_COALESCE_CAPACITY,
        }
    }
}

static GLOBAL: OnceLock<ClientConfig> = OnceLock::new();

impl ClientConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig::default(),
        }
    }

    /// Process-wide configuration, read from the environment on first use.
    pub fn global() -> &'static ClientConfig {
        GLOBAL.get_or_init(Self::from_env)
    }

    /// Read the environment now (uncached).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        if let Some(host) = lookup("TF_WORKER_HOST").filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = lookup("TF_WORKER_PORT")
            .and_then(|p| p.trim().parse::<u16>().ok())
            .filter(|&p| p > 0)
        {
            config.port = port;
        }
        if let Some(secs) = positive_secs(lookup("TF_CONNECT_TIMEOUT")) {
            config.connect_timeout = secs;
        }
        if let Some(secs) = positive_secs(lookup("TF_IO_TIMEOUT")) {
            config.io_timeout = secs;
        }
        config.debug = lookup("TF_DEBUG").is_some_and(|v| v.trim() == "1");

        config
    }
}

fn positive_secs(value: Option<String>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&s| s > 0)
        .map(Duration::from_secs)
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Coalescing buffer capacity in bytes. Zero sends every
    /// fire-and-forget frame immediately.
    pub fn coalesce_capacity(mut self, bytes: usize) -> Self {
        self.config.coalesce_capacity = bytes;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
