//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::Result;
use relay_settings::{RelaySettings, ServerSettings};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::health::{self, HealthResponse};
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::{Hub, HubHandle};
use crate::websocket::session::{ConnectionFactory, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Builds connections bound to the hub.
    pub factory: ConnectionFactory,
    /// Listener and upgrade policy.
    pub server: Arc<ServerSettings>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The relay server. Owns the hub task and the shutdown signal.
pub struct RelayServer {
    settings: RelaySettings,
    factory: ConnectionFactory,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
    hub_task: JoinHandle<()>,
}

impl RelayServer {
    /// Create a server and start its hub. Must be called within a Tokio runtime.
    pub fn new(settings: RelaySettings, metrics: PrometheusHandle) -> Self {
        let (hub, hub_task) = Hub::spawn(settings.relay.echo_to_sender);
        let factory = ConnectionFactory::new(hub, &settings.relay);
        Self {
            settings,
            factory,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
            hub_task,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            factory: self.factory.clone(),
            server: Arc::new(self.settings.server.clone()),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve in the background until
    /// shutdown is triggered.
    pub async fn listen(&self) -> Result<ServerHandle> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });

        info!(%local_addr, "relay server listening");
        Ok(ServerHandle { local_addr, task })
    }

    /// Stop accepting connections, close every live connection, and wait up
    /// to `timeout` for the listener to finish. Returns `true` on a clean drain.
    pub async fn graceful_shutdown(&self, handle: ServerHandle, timeout: Duration) -> bool {
        info!(connections = self.hub().connection_count(), "shutting down");
        self.shutdown.shutdown();
        if self.hub().disconnect_all().await.is_err() {
            warn!("hub stopped before shutdown");
        }
        self.shutdown.drain(vec![handle.task], timeout).await
    }

    /// The hub every connection registers with.
    pub fn hub(&self) -> &HubHandle {
        self.factory.hub()
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The settings this server was built with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Whether the hub loop has exited.
    pub fn hub_finished(&self) -> bool {
        self.hub_task.is_finished()
    }
}

/// A running listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address (useful when the configured port was `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the listener task to exit.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task failed");
        }
    }
}

/// Whether `origin` passes the allow-list. An empty list allows everything,
/// and requests without an `Origin` header (non-browser clients) are allowed.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    match origin {
        _ if allowed.is_empty() => true,
        None => true,
        Some(origin) => allowed.iter().any(|a| a == origin),
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.server.allowed_origins, origin) {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "origin").increment(1);
        warn!(%remote_addr, ?origin, "rejected upgrade from disallowed origin");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let connections = state.factory.hub().connection_count();
    if connections >= state.server.max_connections {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(%remote_addr, connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let connection = state.factory.create();
    ws.max_message_size(state.server.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, connection, remote_addr))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.factory.hub().connection_count(),
        state.factory.shared_history().len(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
