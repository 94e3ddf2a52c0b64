//! Server and connection settings.

use std::time::Duration;

use relay_core::{DEFAULT_HISTORY_CAPACITY, HistoryScope, TransformKind};
use serde::{Deserialize, Serialize};

/// HTTP listener and WebSocket upgrade settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Allowed `Origin` header values. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

/// Per-connection behaviour: queues, deadlines, history, fan-out policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Number of recent messages kept for `"history"` requests.
    pub history_capacity: usize,
    /// Whether history is shared server-wide or kept per connection.
    pub history_scope: HistoryScope,
    /// Outbound queue depth per connection; overflowing it disconnects the client.
    pub outbound_queue_capacity: usize,
    /// Read deadline in milliseconds. Pings go out every half of this.
    pub idle_timeout_ms: u64,
    /// Deadline for writing a single frame, in milliseconds.
    pub write_timeout_ms: u64,
    /// Whether the sender also receives its own broadcast.
    pub echo_to_sender: bool,
    /// Transform applied to messages before broadcast.
    pub transform: TransformKind,
}

impl ConnectionSettings {
    /// Read deadline.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Ping period: half the idle timeout, so a live peer always answers
    /// before its read deadline passes.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.idle_timeout_ms / 2).max(1))
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_scope: HistoryScope::Shared,
            outbound_queue_capacity: 256,
            idle_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            echo_to_sender: true,
            transform: TransformKind::Reverse,
        }
    }
}
