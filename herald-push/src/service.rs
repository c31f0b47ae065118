//! Real-time push service.
//!
//! Owns the connection registry and the bounded replay log. Live sends
//! append to the log first and then fan out to every open connection of
//! the addressed recipients; reconnecting clients replay what they missed
//! (within retention) before any subsequent live frame. Delivery is
//! at-least-once per open connection, and one connection's failure never
//! blocks the others.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use herald_core::types::{EventId, UserId};

use crate::config::PushConfig;
use crate::connection::{ConnectionId, ConnectionRegistry, PushConnection};
use crate::event::PushEvent;
use crate::frame::PushFrame;
use crate::replay::ReplayLog;

/// Handle returned to the transport layer for one connected client.
///
/// Dropping the subscription (or its receiver) completes the connection;
/// the service reacts by removing it from the registry.
pub struct PushSubscription {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Recipient this stream belongs to.
    pub recipient_id: UserId,
    /// Ordered frame stream: replayed frames first, then live pushes.
    pub frames: mpsc::Receiver<PushFrame>,
}

impl PushSubscription {
    /// Receives the next frame, or `None` once the connection is done.
    pub async fn next_frame(&mut self) -> Option<PushFrame> {
        self.frames.recv().await
    }
}

/// Push delivery service.
pub struct PushService {
    config: PushConfig,
    registry: Arc<ConnectionRegistry>,
    replay: Arc<ReplayLog>,
}

impl PushService {
    /// Creates a service with the given configuration.
    #[must_use]
    pub fn new(config: PushConfig) -> Self {
        let replay = Arc::new(ReplayLog::new(config.replay_capacity));
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            replay,
        }
    }

    /// Returns the replay log.
    #[must_use]
    pub fn replay_log(&self) -> &ReplayLog {
        &self.replay
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Opens a connection for a recipient.
    ///
    /// With `last_seen`, every still-retained event enqueued strictly
    /// after it and addressed to this recipient (directly or broadcast) is
    /// replayed in original enqueue order. Replay happens before the
    /// connection is registered, so no live push can precede a replayed
    /// frame on this stream. The connection lives until the client side
    /// completes, a delivery fails, or the idle timeout elapses - all
    /// converging on the same registry removal.
    pub fn connect(&self, recipient_id: UserId, last_seen: Option<EventId>) -> PushSubscription {
        let (tx, rx) = mpsc::channel(self.config.frame_buffer.max(1));
        let connection = Arc::new(PushConnection::new(recipient_id, tx));

        if let Some(cursor) = last_seen {
            let missed = self.replay.events_after(cursor, recipient_id);
            debug!(
                recipient = %recipient_id,
                connection = %connection.id(),
                count = missed.len(),
                "Replaying missed events"
            );
            for event in missed {
                if let Err(err) = connection.try_deliver(PushFrame::from_event(&event)) {
                    warn!(
                        connection = %connection.id(),
                        event = %event.id,
                        error = %err,
                        "Replay delivery failed"
                    );
                    break;
                }
            }
        }

        self.registry.register(Arc::clone(&connection));
        self.spawn_watchdog(Arc::clone(&connection));

        info!(
            recipient = %recipient_id,
            connection = %connection.id(),
            "Push connection opened"
        );

        PushSubscription {
            connection_id: connection.id(),
            recipient_id,
            frames: rx,
        }
    }

    /// Sends an event to one recipient.
    ///
    /// The event is appended to the replay log first (evicting if needed),
    /// then delivered to every currently open connection of the recipient.
    /// Zero open connections is not an error - the event stays retained
    /// for a future reconnect.
    pub fn send(&self, recipient_id: UserId, name: &str, payload: serde_json::Value) {
        let event = self
            .replay
            .append(PushEvent::to_recipient(recipient_id, name, payload));
        let connections = self.registry.connections_for(recipient_id);
        if connections.is_empty() {
            debug!(
                recipient = %recipient_id,
                event = %event.id,
                "No open connections, event retained for replay"
            );
            return;
        }
        self.deliver(&event, connections);
    }

    /// Sends one event addressed to a whole recipient set.
    pub fn send_to_all(&self, recipient_ids: &[UserId], name: &str, payload: serde_json::Value) {
        let event = self.replay.append(PushEvent::to_recipients(
            recipient_ids.iter().copied(),
            name,
            payload,
        ));
        let targets: HashSet<UserId> = recipient_ids.iter().copied().collect();
        let connections = self.registry.connections_for_any(&targets);
        self.deliver(&event, connections);
    }

    /// Broadcasts an event to everyone, present and (within retention)
    /// future.
    pub fn broadcast(&self, name: &str, payload: serde_json::Value) {
        let event = self.replay.append(PushEvent::broadcast(name, payload));
        self.deliver(&event, self.registry.all_connections());
    }

    /// Sends a keep-alive ping to every open connection.
    ///
    /// A failed ping forces the connection into error-completion; this is
    /// what reaps half-open connections the transport would otherwise hold
    /// indefinitely.
    pub fn ping_all(&self) {
        let connections = self.registry.all_connections();
        debug!(connections = connections.len(), "Sending keep-alive pings");
        for connection in connections {
            if let Err(err) = connection.try_deliver(PushFrame::ping()) {
                warn!(
                    connection = %connection.id(),
                    recipient = %connection.recipient_id(),
                    error = %err,
                    "Keep-alive failed, closing connection"
                );
                self.registry
                    .remove(connection.recipient_id(), connection.id());
            }
        }
    }

    /// Spawns the periodic keep-alive task.
    pub fn spawn_keepalive(self: Arc<Self>) -> JoinHandle<()> {
        let service = self;
        let period = service.config.keepalive_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.ping_all();
            }
        })
    }

    fn deliver(&self, event: &Arc<PushEvent>, connections: Vec<Arc<PushConnection>>) {
        let frame = PushFrame::from_event(event);
        for connection in connections {
            if let Err(err) = connection.try_deliver(frame.clone()) {
                // Isolated: this connection is torn down, the rest of the
                // call proceeds untouched.
                warn!(
                    connection = %connection.id(),
                    recipient = %connection.recipient_id(),
                    error = %err,
                    "Frame delivery failed, closing connection"
                );
                self.registry
                    .remove(connection.recipient_id(), connection.id());
            }
        }
        debug!(event = %event.id, name = %event.name, "Push event delivered");
    }

    fn spawn_watchdog(&self, connection: Arc<PushConnection>) {
        let registry = Arc::clone(&self.registry);
        let idle = self.config.idle_timeout();
        tokio::spawn(async move {
            tokio::select! {
                () = connection.closed() => {
                    debug!(connection = %connection.id(), "Connection completed by client");
                }
                () = tokio::time::sleep(idle) => {
                    debug!(connection = %connection.id(), "Connection idle timeout");
                }
            }
            registry.remove(connection.recipient_id(), connection.id());
        });
    }
}

impl std::fmt::Debug for PushService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushService")
            .field("connections", &self.connection_count())
            .field("replay_len", &self.replay.len())
            .finish_non_exhaustive()
    }
}
