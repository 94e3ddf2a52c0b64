//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally. Renders
/// an empty exposition; useful when metrics are disabled and in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections registered with the hub (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections dropped because their outbound queue was full (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrade requests refused, labelled by `reason` (counter).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
/// Messages relayed to the hub for broadcast (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// History snapshots served (counter).
pub const RELAY_HISTORY_REQUESTS_TOTAL: &str = "relay_history_requests_total";
