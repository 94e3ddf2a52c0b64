//! # relay-core
//!
//! Foundation types shared by the relay crates.
//!
//! - **Connection IDs**: [`ConnectionId`] newtype (UUID v7)
//! - **History**: [`MessageHistory`], a bounded, mutex-guarded ring of recent messages
//! - **Transforms**: [`MessageTransform`] and the built-in [`TransformKind`]s
//! - **Protocol**: classification of inbound text frames and history encoding
//! - **Errors**: [`RelayError`] via `thiserror`
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod errors;
pub mod history;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod transform;

pub use errors::{RelayError, Result};
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryScope, MessageHistory};
pub use ids::ConnectionId;
pub use protocol::{HISTORY_COMMAND, InboundCommand};
pub use transform::{MessageTransform, Reverse, TransformKind};
