//! One client connection: identity, lifecycle, and the read pump.
//!
//! [`Connection::serve`] spawns the write pump, registers with the hub,
//! reads until the client leaves or goes quiet, then unregisters. Inbound
//! messages never touch the transport directly: broadcasts and history
//! replies both travel through the hub into the outbound queue.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use metrics::counter;
use relay_core::protocol::encode_history;
use relay_core::{ConnectionId, InboundCommand, MessageHistory, MessageTransform, RelayError, Result};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::heartbeat::Deadlines;
use super::hub::HubHandle;
use super::write_pump::{WriteOutcome, run_write_pump};
use crate::metrics::{RELAY_HISTORY_REQUESTS_TOTAL, RELAY_MESSAGES_TOTAL};

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet registered with the hub.
    Connecting,
    /// Registered and relaying messages.
    Active,
    /// Reading stopped; waiting for the write pump to finish.
    Draining,
    /// Unregistered and transport closed.
    Closed,
}

/// Why the read side of a connection stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// The transport reported an error.
    ReadError(String),
    /// The write pump closed the transport.
    TransportClosed,
    /// The hub loop is gone.
    HubClosed,
}

/// A single client connection.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    hub: HubHandle,
    history: Arc<MessageHistory>,
    transform: Arc<dyn MessageTransform>,
    deadlines: Deadlines,
    queue_capacity: usize,
    state: ConnectionState,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection bound to `hub`. `queue_capacity` must be non-zero.
    pub fn new(
        id: ConnectionId,
        hub: HubHandle,
        history: Arc<MessageHistory>,
        transform: Arc<dyn MessageTransform>,
        deadlines: Deadlines,
        queue_capacity: usize,
    ) -> Self {
        Self {
            id,
            remote_addr: None,
            hub,
            history,
            transform,
            deadlines,
            queue_capacity: queue_capacity.max(1),
            state: ConnectionState::Connecting,
            connected_at: Instant::now(),
        }
    }

    /// Attach the peer address, used for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Peer address, if known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the connection to completion over a split transport.
    pub async fn serve<W, S, E>(mut self, sink: W, stream: S) -> DisconnectReason
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
        S: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let transport_closed = CancellationToken::new();
        let writer = tokio::spawn(run_write_pump(
            sink,
            outbound_rx,
            self.deadlines,
            transport_closed.clone(),
        ));

        // On failure the sender is dropped with the command, which closes the
        // queue and lets the writer shut the transport.
        let reason = if self.hub.register(self.id.clone(), outbound_tx).await.is_ok() {
            self.state = ConnectionState::Active;
            info!(conn_id = %self.id, remote_addr = ?self.remote_addr, "client connected");
            self.read_pump(stream, &transport_closed).await
        } else {
            DisconnectReason::HubClosed
        };

        self.state = ConnectionState::Draining;
        if self.hub.unregister(&self.id).await.is_err() {
            debug!(conn_id = %self.id, "hub already stopped");
        }
        match writer.await {
            Ok(WriteOutcome::Failed(e)) => debug!(conn_id = %self.id, error = %e, "writer failed"),
            Ok(outcome) => debug!(conn_id = %self.id, ?outcome, "writer finished"),
            Err(e) => warn!(conn_id = %self.id, error = %e, "writer task panicked"),
        }
        self.state = ConnectionState::Closed;
        info!(
            conn_id = %self.id,
            ?reason,
            duration_ms = u64::try_from(self.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "client disconnected"
        );
        reason
    }

    /// Read frames until the client leaves, the idle deadline passes, or the
    /// write side closes the transport. The deadline restarts on every frame.
    pub async fn read_pump<S, E>(&self, mut stream: S, transport_closed: &CancellationToken) -> DisconnectReason
    where
        S: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let next = tokio::select! {
                biased;
                () = transport_closed.cancelled() => return DisconnectReason::TransportClosed,
                next = timeout(self.deadlines.idle_timeout, stream.next()) => next,
            };
            let Ok(next) = next else {
                info!(conn_id = %self.id, timeout = ?self.deadlines.idle_timeout, "client idle, disconnecting");
                return DisconnectReason::IdleTimeout;
            };
            match next {
                None => return DisconnectReason::StreamEnded,
                Some(Err(e)) => {
                    debug!(conn_id = %self.id, error = %e, "read failed");
                    return DisconnectReason::ReadError(e.to_string());
                }
                Some(Ok(Message::Text(text))) => match self.handle_text(text.as_str()).await {
                    Ok(()) => {}
                    Err(RelayError::HubClosed) => return DisconnectReason::HubClosed,
                    Err(e) => warn!(conn_id = %self.id, error = %e, "failed to handle message"),
                },
                Some(Ok(Message::Binary(data))) => {
                    debug!(conn_id = %self.id, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn_id = %self.id, ?frame, "client sent close frame");
                    return DisconnectReason::ClientClosed;
                }
            }
        }
    }

    /// Act on one inbound text message: answer a history request, or
    /// transform and broadcast anything else.
    pub async fn handle_text(&self, text: &str) -> Result<()> {
        match InboundCommand::parse(text) {
            InboundCommand::History => {
                counter!(RELAY_HISTORY_REQUESTS_TOTAL).increment(1);
                let reply = encode_history(&self.history.snapshot())?;
                self.hub.send_to(&self.id, reply).await
            }
            InboundCommand::Relay(raw) => {
                counter!(RELAY_MESSAGES_TOTAL).increment(1);
                let transformed = self.transform.apply(raw);
                self.history.add_message(raw);
                self.hub.broadcast(transformed, Some(&self.id)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::websocket::hub::{Hub, Outbound};
    use futures::channel::mpsc as frames;
    use relay_core::{Reverse, transform::Identity};

    type Inbound = std::result::Result<Message, std::io::Error>;

    fn deadlines() -> Deadlines {
        Deadlines::new(Duration::from_secs(10), Duration::from_secs(1))
    }

    fn connection(id: &str, hub: &HubHandle, history: &Arc<MessageHistory>) -> Connection {
        Connection::new(
            ConnectionId::from(id),
            hub.clone(),
            Arc::clone(history),
            Arc::new(Reverse),
            deadlines(),
            16,
        )
    }

    async fn join(hub: &HubHandle, id: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(16);
        hub.register(ConnectionId::from(id), tx).await.unwrap();
        rx
    }

    fn text(s: &str) -> Inbound {
        Ok(Message::Text(s.to_owned().into()))
    }

    #[tokio::test]
    async fn relay_message_is_transformed_and_recorded() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let mut peer = join(&hub, "peer").await;
        let conn = connection("me", &hub, &history);

        conn.handle_text("hello").await.unwrap();

        assert_eq!(peer.recv().await.unwrap().as_str(), "olleh");
        assert_eq!(history.snapshot(), vec!["hello"]);
    }

    #[tokio::test]
    async fn history_request_replies_only_to_sender() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        history.add_message("a");
        history.add_message("b");
        let mut me = join(&hub, "me").await;
        let mut peer = join(&hub, "peer").await;
        let conn = connection("me", &hub, &history);

        conn.handle_text("history").await.unwrap();
        let _ = hub.is_registered(conn.id()).await.unwrap();

        assert_eq!(me.try_recv().unwrap().as_str(), r#"["a","b"]"#);
        assert!(peer.try_recv().is_err());
        assert_eq!(history.snapshot(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_history_is_empty_array() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let mut me = join(&hub, "me").await;
        let conn = connection("me", &hub, &history);

        conn.handle_text("history").await.unwrap();
        assert_eq!(me.recv().await.unwrap().as_str(), "[]");
    }

    #[tokio::test]
    async fn history_keeps_latest_messages() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let mut me = join(&hub, "me").await;
        let conn = connection("me", &hub, &history);

        for i in 1..=7 {
            conn.handle_text(&format!("m{i}")).await.unwrap();
        }
        conn.handle_text("history").await.unwrap();

        for _ in 1..=7 {
            let _ = me.recv().await.unwrap();
        }
        let reply: Vec<String> = serde_json::from_str(me.recv().await.unwrap().as_str()).unwrap();
        assert_eq!(reply, vec!["m3", "m4", "m5", "m6", "m7"]);
    }

    #[tokio::test]
    async fn custom_transform_is_applied() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let mut peer = join(&hub, "peer").await;
        let conn = Connection::new(
            ConnectionId::from("me"),
            hub.clone(),
            Arc::clone(&history),
            Arc::new(Identity),
            deadlines(),
            16,
        );

        conn.handle_text("same").await.unwrap();
        assert_eq!(peer.recv().await.unwrap().as_str(), "same");
    }

    #[tokio::test]
    async fn read_pump_relays_and_skips_binary() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let mut peer = join(&hub, "peer").await;
        let conn = connection("me", &hub, &history);

        let frames = futures::stream::iter(vec![
            text("abc"),
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            text("xyz"),
        ]);
        let reason = conn.read_pump(frames, &CancellationToken::new()).await;

        assert_eq!(reason, DisconnectReason::StreamEnded);
        assert_eq!(peer.recv().await.unwrap().as_str(), "cba");
        assert_eq!(peer.recv().await.unwrap().as_str(), "zyx");
        assert_eq!(history.snapshot(), vec!["abc", "xyz"]);
    }

    #[tokio::test]
    async fn read_pump_stops_on_close_frame() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);

        let frames = futures::stream::iter(vec![Ok(Message::Close(None)), text("after")]);
        let reason = conn.read_pump(frames, &CancellationToken::new()).await;

        assert_eq!(reason, DisconnectReason::ClientClosed);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn read_pump_reports_transport_error() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);

        let frames = futures::stream::iter(vec![Err::<Message, _>(std::io::Error::other("reset"))]);
        let reason = conn.read_pump(frames, &CancellationToken::new()).await;
        assert_eq!(reason, DisconnectReason::ReadError("reset".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn read_pump_times_out_when_idle() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);

        let start = tokio::time::Instant::now();
        let reason = conn
            .read_pump(futures::stream::pending::<Inbound>(), &CancellationToken::new())
            .await;

        assert_eq!(reason, DisconnectReason::IdleTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn read_deadline_resets_on_each_frame() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);
        let (tx, rx) = frames::unbounded::<Inbound>();

        let feeder = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(8)).await;
                tx.unbounded_send(Ok(Message::Pong(vec![].into()))).unwrap();
            }
            // Keep the stream open so only the deadline can end it.
            std::future::pending::<()>().await;
        });

        let start = tokio::time::Instant::now();
        let reason = conn.read_pump(rx, &CancellationToken::new()).await;

        assert_eq!(reason, DisconnectReason::IdleTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(24 + 10));
        feeder.abort();
    }

    #[tokio::test]
    async fn read_pump_stops_when_transport_closed() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);
        let token = CancellationToken::new();
        token.cancel();

        let reason = conn.read_pump(futures::stream::pending::<Inbound>(), &token).await;
        assert_eq!(reason, DisconnectReason::TransportClosed);
    }

    #[tokio::test]
    async fn serve_full_lifecycle() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let (sink, mut written) = frames::channel::<Message>(16);
        let (client, inbound) = frames::unbounded::<Inbound>();
        let session = tokio::spawn(conn.serve(sink, inbound));

        client.unbounded_send(text("hi")).unwrap();
        assert!(matches!(written.next().await.unwrap(), Message::Text(t) if t.as_str() == "ih"));

        client.unbounded_send(text("history")).unwrap();
        assert!(matches!(written.next().await.unwrap(), Message::Text(t) if t.as_str() == r#"["hi"]"#));

        client.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(session.await.unwrap(), DisconnectReason::ClientClosed);

        assert!(matches!(written.next().await.unwrap(), Message::Close(None)));
        assert!(written.next().await.is_none());
        assert!(!hub.is_registered(&ConnectionId::from("me")).await.unwrap());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn serve_ends_when_writer_fails() {
        let (hub, _task) = Hub::spawn(true);
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);

        let (sink, written) = frames::channel::<Message>(16);
        drop(written);
        let (client, inbound) = frames::unbounded::<Inbound>();
        let session = tokio::spawn(conn.serve(sink, inbound));

        // The echo cannot be written, so the writer shuts the transport.
        client.unbounded_send(text("boom")).unwrap();
        assert_eq!(session.await.unwrap(), DisconnectReason::TransportClosed);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn serve_without_hub_closes_transport() {
        let (hub, task) = Hub::spawn(true);
        task.abort();
        let _ = task.await;
        let history = Arc::new(MessageHistory::new(5));
        let conn = connection("me", &hub, &history);

        let (sink, mut written) = frames::channel::<Message>(16);
        let (_client, inbound) = frames::unbounded::<Inbound>();
        let reason = conn.serve(sink, inbound).await;

        assert_eq!(reason, DisconnectReason::HubClosed);
        assert!(matches!(written.next().await.unwrap(), Message::Close(None)));
    }
}
