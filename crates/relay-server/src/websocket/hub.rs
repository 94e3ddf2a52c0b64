//! Connection membership and fan-out.
//!
//! A single coordination task owns the live-connection map. Every change to
//! membership and every delivery goes through its command queue, so register,
//! unregister, and broadcast are serialized without a lock. The hub holds the
//! only sender for each outbound queue: removing a member drops that sender,
//! which closes the queue exactly once and lets the write pump finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use relay_core::{ConnectionId, RelayError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE};

/// A message queued for delivery. Shared between all recipients of a broadcast.
pub type Outbound = Arc<String>;

/// Depth of the hub's own command queue.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

enum HubCommand {
    Register {
        id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        message: Outbound,
        origin: Option<ConnectionId>,
    },
    SendTo {
        id: ConnectionId,
        message: Outbound,
    },
    IsRegistered {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    DisconnectAll,
}

/// Cloneable handle to the hub's coordination loop.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    live: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Add a connection with its outbound queue. Registering an id that is
    /// already live is a no-op and the new sender is dropped.
    pub async fn register(&self, id: ConnectionId, outbound: mpsc::Sender<Outbound>) -> Result<()> {
        self.send(HubCommand::Register { id, outbound }).await
    }

    /// Remove a connection and close its outbound queue. Unknown ids are ignored,
    /// so calling this twice is harmless.
    pub async fn unregister(&self, id: &ConnectionId) -> Result<()> {
        self.send(HubCommand::Unregister { id: id.clone() }).await
    }

    /// Queue `message` for every live connection. With echo disabled the
    /// `origin` connection is skipped.
    pub async fn broadcast(&self, message: impl Into<String>, origin: Option<&ConnectionId>) -> Result<()> {
        self.send(HubCommand::Broadcast {
            message: Arc::new(message.into()),
            origin: origin.cloned(),
        })
        .await
    }

    /// Queue `message` for a single connection.
    pub async fn send_to(&self, id: &ConnectionId, message: impl Into<String>) -> Result<()> {
        self.send(HubCommand::SendTo {
            id: id.clone(),
            message: Arc::new(message.into()),
        })
        .await
    }

    /// Whether `id` is currently a member. Answered by the coordination loop,
    /// so it observes every command queued before it.
    pub async fn is_registered(&self, id: &ConnectionId) -> Result<bool> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::IsRegistered {
            id: id.clone(),
            reply,
        })
        .await?;
        answer.await.map_err(|_| RelayError::HubClosed)
    }

    /// Remove every connection, closing all outbound queues.
    pub async fn disconnect_all(&self) -> Result<()> {
        self.send(HubCommand::DisconnectAll).await
    }

    /// Number of live connections, as last recorded by the coordination loop.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    async fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::HubClosed)
    }
}

/// The coordination loop state. Owned by exactly one task.
pub struct Hub {
    connections: HashMap<ConnectionId, mpsc::Sender<Outbound>>,
    commands: mpsc::Receiver<HubCommand>,
    live: Arc<AtomicUsize>,
    echo_to_sender: bool,
}

impl Hub {
    /// Create a hub and the handle used to talk to it.
    pub fn new(echo_to_sender: bool) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let live = Arc::new(AtomicUsize::new(0));
        let hub = Self {
            connections: HashMap::new(),
            commands: rx,
            live: Arc::clone(&live),
            echo_to_sender,
        };
        (hub, HubHandle { commands: tx, live })
    }

    /// Create a hub and run it on a new task.
    pub fn spawn(echo_to_sender: bool) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(echo_to_sender);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process commands until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        debug!(echo_to_sender = self.echo_to_sender, "hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        self.connections.clear();
        self.record_count();
        debug!("hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { id, outbound } => self.register(id, outbound),
            HubCommand::Unregister { id } => {
                if self.connections.remove(&id).is_some() {
                    debug!(conn_id = %id, "connection unregistered");
                    self.record_count();
                }
            }
            HubCommand::Broadcast { message, origin } => self.broadcast(&message, origin.as_ref()),
            HubCommand::SendTo { id, message } => self.send_to(&id, message),
            HubCommand::IsRegistered { id, reply } => {
                let _ = reply.send(self.connections.contains_key(&id));
            }
            HubCommand::DisconnectAll => {
                let count = self.connections.len();
                self.connections.clear();
                self.record_count();
                info!(count, "disconnected all connections");
            }
        }
    }

    fn register(&mut self, id: ConnectionId, outbound: mpsc::Sender<Outbound>) {
        if self.connections.contains_key(&id) {
            warn!(conn_id = %id, "connection already registered, ignoring");
            return;
        }
        debug!(conn_id = %id, "connection registered");
        let _ = self.connections.insert(id, outbound);
        self.record_count();
    }

    fn broadcast(&mut self, message: &Outbound, origin: Option<&ConnectionId>) {
        let mut to_remove = Vec::new();
        let mut recipients = 0u32;
        for (id, outbound) in &self.connections {
            if !self.echo_to_sender && origin == Some(id) {
                continue;
            }
            match outbound.try_send(Arc::clone(message)) {
                Ok(()) => recipients += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    warn!(conn_id = %id, "outbound queue full, disconnecting slow client");
                    to_remove.push(id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => to_remove.push(id.clone()),
            }
        }
        debug!(recipients, dropped = to_remove.len(), "broadcast message");
        self.remove_all(&to_remove);
    }

    fn send_to(&mut self, id: &ConnectionId, message: Outbound) {
        let Some(outbound) = self.connections.get(id) else {
            debug!(conn_id = %id, "direct send to unknown connection");
            return;
        };
        match outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %id, "outbound queue full on direct send, disconnecting");
                self.remove_all(std::slice::from_ref(id));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.remove_all(std::slice::from_ref(id)),
        }
    }

    fn remove_all(&mut self, ids: &[ConnectionId]) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            let _ = self.connections.remove(id);
        }
        self.record_count();
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_count(&self) {
        let count = self.connections.len();
        self.live.store(count, Ordering::Relaxed);
        gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
    }
}
