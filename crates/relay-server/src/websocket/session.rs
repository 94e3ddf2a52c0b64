//! WebSocket session lifecycle: builds a [`Connection`] for each upgraded
//! socket and runs it from upgrade through disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures::StreamExt;
use metrics::{counter, histogram};
use relay_core::{ConnectionId, HistoryScope, MessageHistory, MessageTransform};
use relay_settings::ConnectionSettings;
use tracing::instrument;

use super::connection::Connection;
use super::heartbeat::Deadlines;
use super::hub::HubHandle;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Creates connections that share the hub, transform, and (when the scope is
/// shared) the message history.
#[derive(Clone)]
pub struct ConnectionFactory {
    hub: HubHandle,
    shared_history: Arc<MessageHistory>,
    history_scope: HistoryScope,
    history_capacity: usize,
    transform: Arc<dyn MessageTransform>,
    deadlines: Deadlines,
    queue_capacity: usize,
}

impl ConnectionFactory {
    /// Build a factory from connection settings.
    pub fn new(hub: HubHandle, settings: &ConnectionSettings) -> Self {
        Self {
            hub,
            shared_history: Arc::new(MessageHistory::new(settings.history_capacity)),
            history_scope: settings.history_scope,
            history_capacity: settings.history_capacity,
            transform: settings.transform.build(),
            deadlines: Deadlines::from(settings),
            queue_capacity: settings.outbound_queue_capacity,
        }
    }

    /// A fresh connection with a new ID.
    pub fn create(&self) -> Connection {
        let history = match self.history_scope {
            HistoryScope::Shared => Arc::clone(&self.shared_history),
            HistoryScope::PerConnection => Arc::new(MessageHistory::new(self.history_capacity)),
        };
        Connection::new(
            ConnectionId::new(),
            self.hub.clone(),
            history,
            Arc::clone(&self.transform),
            self.deadlines,
            self.queue_capacity,
        )
    }

    /// The server-wide history. Unused by connections in per-connection scope.
    pub fn shared_history(&self) -> &Arc<MessageHistory> {
        &self.shared_history
    }

    /// The hub every connection registers with.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }
}

/// Run an upgraded socket as a relay connection.
#[instrument(skip_all, fields(conn_id = %connection.id(), remote_addr = %remote_addr))]
pub async fn run_ws_session(socket: WebSocket, connection: Connection, remote_addr: SocketAddr) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    let started = std::time::Instant::now();

    let (sink, stream) = socket.split();
    let _reason = connection.with_remote_addr(remote_addr).serve(sink, stream).await;

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::Hub;
    use relay_core::TransformKind;

    #[tokio::test]
    async fn shared_scope_reuses_history() {
        let (hub, _task) = Hub::spawn(true);
        let factory = ConnectionFactory::new(hub, &ConnectionSettings::default());
        let a = factory.create();
        let b = factory.create();
        assert_ne!(a.id(), b.id());

        a.handle_text("from a").await.unwrap();
        b.handle_text("from b").await.unwrap();
        assert_eq!(factory.shared_history().snapshot(), vec!["from a", "from b"]);
    }

    #[tokio::test]
    async fn per_connection_scope_isolates_history() {
        let (hub, _task) = Hub::spawn(true);
        let settings = ConnectionSettings {
            history_scope: HistoryScope::PerConnection,
            ..ConnectionSettings::default()
        };
        let factory = ConnectionFactory::new(hub.clone(), &settings);
        let a = factory.create();
        let b = factory.create();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        hub.register(b.id().clone(), tx).await.unwrap();

        a.handle_text("secret").await.unwrap();
        let _ = rx.recv().await.unwrap();
        b.handle_text("history").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().as_str(), "[]");
        assert!(factory.shared_history().is_empty());
    }

    #[tokio::test]
    async fn factory_uses_configured_transform() {
        let (hub, _task) = Hub::spawn(true);
        let settings = ConnectionSettings {
            transform: TransformKind::Uppercase,
            ..ConnectionSettings::default()
        };
        let factory = ConnectionFactory::new(hub.clone(), &settings);
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        hub.register(ConnectionId::from("peer"), tx).await.unwrap();

        factory.create().handle_text("shout").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_str(), "SHOUT");
    }
}
