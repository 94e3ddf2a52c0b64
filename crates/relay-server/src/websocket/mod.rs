//! WebSocket relay: hub, per-connection pumps, and session wiring.
//!
//! Each connection runs a read pump (inbound frames, deadline-bounded) and a
//! write pump (the sole writer, with heartbeat pings). The hub owns
//! membership and fans messages out through per-connection bounded queues.

pub mod connection;
pub mod heartbeat;
pub mod hub;
pub mod session;
pub mod write_pump;
