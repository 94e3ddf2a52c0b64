//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their default value.

mod server;

pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "relay": { "historyCapacity": 10, "echoToSender": false }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP listener and upgrade policy.
    pub server: ServerSettings,
    /// Per-connection and fan-out behaviour.
    pub relay: ConnectionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.outboundQueueCapacity must be greater than 0".into(),
            ));
        }
        if self.relay.idle_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.idleTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.relay.write_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.writeTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
