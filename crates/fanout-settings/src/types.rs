//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format and `#[serde(default)]` so partial files are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loader::MAX_POLL_INTERVAL_SECS;

/// Root settings type for a fanout worker.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "store": { "url": "redis://cache:6379/0" },
///   "shutdown": { "gracefulTimeoutSecs": 120 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// HTTP / WebSocket listener settings.
    pub server: ServerSettings,
    /// Shared store (registry set + broadcast channel) settings.
    pub store: StoreSettings,
    /// Graceful shutdown drain settings.
    pub shutdown: ShutdownSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            outbound_queue: 256,
        }
    }
}

/// Shared store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Connection URL of the shared store.
    pub url: String,
    /// Pub/sub channel carrying broadcast messages.
    pub broadcast_channel: String,
    /// Set key holding every live connection identifier.
    pub connections_key: String,
    /// Upper bound on a single relay wait for the next message, in seconds.
    pub poll_interval_secs: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            broadcast_channel: "ws:broadcast".to_string(),
            connections_key: "ws:connections".to_string(),
            poll_interval_secs: 1.0,
        }
    }
}

impl StoreSettings {
    /// Relay poll interval as a [`Duration`].
    ///
    /// Values `Duration` cannot hold fall back to the longest accepted
    /// interval; [`validate`](crate::loader::validate) rejects them on load.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs)
            .unwrap_or(Duration::from_secs_f64(MAX_POLL_INTERVAL_SECS))
    }
}

/// Graceful shutdown settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// Maximum time to wait for the cluster to drain, in seconds.
    pub graceful_timeout_secs: u64,
    /// Time between drain progress checks, in seconds.
    pub log_interval_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            graceful_timeout_secs: 30,
            log_interval_secs: 5,
        }
    }
}

impl ShutdownSettings {
    /// Drain deadline offset as a [`Duration`].
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }

    /// Drain check interval as a [`Duration`].
    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
