//! Push connection management.
//!
//! This module provides connection state tracking and management including:
//! - Per-connection frame queues
//! - A recipient-keyed registry supporting concurrent insert/remove/iterate
//!
//! The registry is owned by the push service and never exposed as an
//! ambient global. Iteration snapshots the matching connections before any
//! delivery happens, so no registry-wide lock is held across a send.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use herald_core::error::DeliveryError;
use herald_core::types::{Timestamp, UserId};

use crate::frame::PushFrame;

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the inner ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One open client stream.
#[derive(Debug)]
pub struct PushConnection {
    id: ConnectionId,
    recipient_id: UserId,
    created_at: Timestamp,
    sender: mpsc::Sender<PushFrame>,
}

impl PushConnection {
    /// Creates a connection for a recipient over the given frame sender.
    #[must_use]
    pub fn new(recipient_id: UserId, sender: mpsc::Sender<PushFrame>) -> Self {
        Self {
            id: ConnectionId::generate(),
            recipient_id,
            created_at: Timestamp::now(),
            sender,
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the recipient id.
    #[must_use]
    pub const fn recipient_id(&self) -> UserId {
        self.recipient_id
    }

    /// Returns the connection creation time.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Enqueues a frame without blocking.
    ///
    /// A closed receiver or a saturated queue is a delivery failure; the
    /// caller tears the connection down in response.
    pub fn try_deliver(&self, frame: PushFrame) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|err| match err {
            TrySendError::Closed(_) => DeliveryError::ConnectionClosed {
                connection_id: self.id.as_u64(),
            },
            TrySendError::Full(_) => DeliveryError::QueueFull {
                connection_id: self.id.as_u64(),
            },
        })
    }

    /// Resolves when the client side of the connection is gone.
    pub async fn closed(&self) {
        self.sender.closed().await;
    }
}

/// Registry of all open push connections, keyed by recipient.
///
/// A recipient may hold any number of connections (multi-device).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Vec<Arc<PushConnection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a connection under its recipient.
    pub fn register(&self, connection: Arc<PushConnection>) {
        self.connections
            .entry(connection.recipient_id())
            .or_default()
            .push(connection);
    }

    /// Removes a connection. The single cleanup path: completion, timeout,
    /// send error and keep-alive failure all land here.
    ///
    /// Returns true if the connection was still registered.
    pub fn remove(&self, recipient_id: UserId, id: ConnectionId) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.connections.get_mut(&recipient_id) {
            let before = entry.len();
            entry.retain(|c| c.id() != id);
            removed = entry.len() != before;
            if entry.is_empty() {
                drop(entry);
                self.connections
                    .remove_if(&recipient_id, |_, list| list.is_empty());
            }
        }
        removed
    }

    /// Returns a snapshot of the recipient's open connections.
    #[must_use]
    pub fn connections_for(&self, recipient_id: UserId) -> Vec<Arc<PushConnection>> {
        self.connections
            .get(&recipient_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Returns a snapshot of all open connections across a recipient set.
    #[must_use]
    pub fn connections_for_any(&self, recipient_ids: &HashSet<UserId>) -> Vec<Arc<PushConnection>> {
        recipient_ids
            .iter()
            .flat_map(|id| self.connections_for(*id))
            .collect()
    }

    /// Returns a snapshot of every open connection.
    #[must_use]
    pub fn all_connections(&self) -> Vec<Arc<PushConnection>> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns the number of recipients with at least one connection.
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.connections.len()
    }
}
