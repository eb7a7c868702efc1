//! Process-wide registry of live WebSocket connections.
//!
//! A single control-loop task owns the registry. Register, unregister and
//! broadcast requests reach it over one command channel and are applied one at
//! a time, so the connection set needs no lock and every connection sees
//! broadcasts in the order the loop processed them.
//!
//! The registry entry holds the only strong sender of a connection's mailbox.
//! Removing the entry is what closes the mailbox, which tells that
//! connection's writer to send a close frame and exit.

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use super::protocol::ServerEvent;
use super::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub control loop is not running")]
    Closed,
    #[error("mailbox of connection {0} is full")]
    MailboxFull(ConnectionId),
}

/// What a connection gets back from a successful registration.
pub struct Registration {
    pub id: ConnectionId,
    /// Consumed by the connection's writer only.
    pub mailbox: mpsc::Receiver<Message>,
    /// Lets the reader enqueue local replies without keeping the mailbox open.
    pub local: mpsc::WeakSender<Message>,
}

enum HubCommand {
    Register {
        user_id: String,
        greeting: Option<Message>,
        reply: oneshot::Sender<Registration>,
    },
    Unregister(ConnectionId),
    Broadcast(Message),
    SendTo(ConnectionId, Message),
    Shutdown,
    #[cfg(test)]
    Sync(oneshot::Sender<()>),
}

/// Cloneable handle to the hub control loop.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    connected: Arc<AtomicUsize>,
}

/// Start the control loop. Every mailbox it creates holds `mailbox_capacity` frames.
pub fn spawn(mailbox_capacity: usize) -> HubHandle {
    let (commands, rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicUsize::new(0));

    let hub = Hub {
        clients: HashMap::new(),
        next_id: 1,
        mailbox_capacity: mailbox_capacity.max(1),
        connected: connected.clone(),
    };
    tokio::spawn(hub.run(rx));

    HubHandle {
        commands,
        connected,
    }
}

impl HubHandle {
    /// Add a connection to the live set. Resolves once the control loop has
    /// inserted it; every broadcast issued after that point reaches it.
    pub async fn register(&self, user_id: &str) -> Result<Registration, HubError> {
        self.register_inner(user_id, None).await
    }

    /// Like [`HubHandle::register`], with `greeting` queued as the first
    /// frame of the new mailbox, ahead of any broadcast.
    pub async fn register_with_greeting(
        &self,
        user_id: &str,
        greeting: &ServerEvent,
    ) -> Result<Registration, HubError> {
        self.register_inner(user_id, encode_frame(greeting)).await
    }

    async fn register_inner(
        &self,
        user_id: &str,
        greeting: Option<Message>,
    ) -> Result<Registration, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::Register {
                user_id: user_id.to_string(),
                greeting,
                reply,
            })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Remove a connection. Safe to call any number of times.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.commands.send(HubCommand::Unregister(id));
    }

    /// Serialize `event` once and fan it out to every live connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        if let Some(frame) = encode_frame(event) {
            let _ = self.commands.send(HubCommand::Broadcast(frame));
        }
    }

    /// Enqueue `event` for a single connection, with the same overflow policy
    /// as a broadcast.
    pub fn send_to(&self, id: ConnectionId, event: &ServerEvent) {
        if let Some(frame) = encode_frame(event) {
            let _ = self.commands.send(HubCommand::SendTo(id, frame));
        }
    }

    /// Number of registered connections, for diagnostics.
    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    /// Close every mailbox and stop the control loop.
    pub fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown);
    }

    /// Resolves once every command sent before it has been applied.
    #[cfg(test)]
    async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(HubCommand::Sync(tx));
        let _ = rx.await;
    }
}

fn encode_frame(event: &ServerEvent) -> Option<Message> {
    match event.encode() {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "Failed to encode WebSocket event");
            None
        }
    }
}

struct Client {
    user_id: String,
    mailbox: mpsc::Sender<Message>,
}

struct Hub {
    clients: HashMap<ConnectionId, Client>,
    next_id: ConnectionId,
    mailbox_capacity: usize,
    connected: Arc<AtomicUsize>,
}

impl Hub {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                HubCommand::Register {
                    user_id,
                    greeting,
                    reply,
                } => self.register(user_id, greeting, reply),
                HubCommand::Unregister(id) => self.remove(id, "unregistered"),
                HubCommand::Broadcast(frame) => self.broadcast(frame),
                HubCommand::SendTo(id, frame) => self.send_to(id, frame),
                HubCommand::Shutdown => break,
                #[cfg(test)]
                HubCommand::Sync(done) => {
                    let _ = done.send(());
                }
            }
        }

        let remaining = std::mem::take(&mut self.clients);
        self.publish_count();
        tracing::info!(closed = remaining.len(), "WebSocket hub stopped");
        drop(remaining);
    }

    fn register(
        &mut self,
        user_id: String,
        greeting: Option<Message>,
        reply: oneshot::Sender<Registration>,
    ) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, mailbox) = mpsc::channel(self.mailbox_capacity);
        let local = tx.downgrade();
        if let Some(frame) = greeting {
            // Fresh mailbox with capacity >= 1: cannot be full.
            let _ = tx.try_send(frame);
        }
        self.clients.insert(
            id,
            Client {
                user_id: user_id.clone(),
                mailbox: tx,
            },
        );

        self.publish_count();

        if reply.send(Registration { id, mailbox, local }).is_err() {
            // Requester went away before the ack arrived.
            self.clients.remove(&id);
            self.publish_count();
            return;
        }

        tracing::info!(
            user_id = %user_id,
            conn_id = id,
            total = self.clients.len(),
            "WebSocket client registered"
        );
    }

    fn remove(&mut self, id: ConnectionId, reason: &'static str) {
        // Dropping the entry drops the mailbox sender.
        if let Some(client) = self.clients.remove(&id) {
            self.publish_count();
            tracing::info!(
                user_id = %client.user_id,
                conn_id = id,
                reason,
                total = self.clients.len(),
                "WebSocket client unregistered"
            );
        }
    }

    fn broadcast(&mut self, frame: Message) {
        if self.clients.is_empty() {
            return;
        }

        let mut evicted = Vec::new();
        for (id, client) in &self.clients {
            match client.mailbox.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => evicted.push((*id, "mailbox full")),
                Err(TrySendError::Closed(_)) => evicted.push((*id, "mailbox closed")),
            }
        }

        tracing::debug!(
            delivered = self.clients.len() - evicted.len(),
            evicted = evicted.len(),
            "Broadcast fanned out"
        );

        for (id, reason) in evicted {
            self.remove(id, reason);
        }
    }

    fn send_to(&mut self, id: ConnectionId, frame: Message) {
        let outcome = match self.clients.get(&id) {
            Some(client) => client.mailbox.try_send(frame),
            None => return,
        };
        match outcome {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.remove(id, "mailbox full"),
            Err(TrySendError::Closed(_)) => self.remove(id, "mailbox closed"),
        }
    }

    fn publish_count(&self) {
        self.connected.store(self.clients.len(), Ordering::Release);
    }
}
