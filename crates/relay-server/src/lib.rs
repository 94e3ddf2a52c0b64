//! # relay-server
//!
//! Axum WebSocket relay with per-connection read/write pumps and hub fan-out.
//!
//! - **Hub**: single coordination task owning the live-connection set
//! - **Pumps**: read pump with idle deadline, write pump with heartbeat pings
//! - **History**: `"history"` requests answered from a bounded snapshot
//! - **HTTP**: `/ws` upgrade, `/health`, and Prometheus `/metrics`
//! - **Shutdown**: `CancellationToken` coordination with a bounded drain

#![deny(unsafe_code)]

pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use server::{AppState, RelayServer, ServerHandle};
pub use shutdown::{DEFAULT_DRAIN_TIMEOUT, ShutdownCoordinator};
pub use websocket::connection::{Connection, ConnectionState, DisconnectReason};
pub use websocket::hub::{Hub, HubHandle};
