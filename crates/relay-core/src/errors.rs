//! Error types for the relay.
//!
//! Transport failures and write timeouts are connection-fatal: the owning
//! pump logs them and the connection is unregistered. Nothing here is fatal
//! to the process.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while relaying messages.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The underlying transport failed to read or write a frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be written within the write deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// A payload could not be encoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The hub coordination loop is no longer running.
    #[error("hub is not running")]
    HubClosed,

    /// I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
