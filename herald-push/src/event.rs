//! Push event types.
//!
//! A [`PushEvent`] is one replayable delivery unit: a unique id, a target
//! (a specific recipient set or broadcast), an event name and an opaque
//! JSON payload. Events are immutable once stored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use herald_core::types::{EventId, Timestamp, UserId};

/// Addressing of a push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushTarget {
    /// Addressed to a specific recipient set.
    Recipients {
        /// The addressed recipients.
        ids: HashSet<UserId>,
    },
    /// Addressed to everyone, present and future within retention.
    Broadcast,
}

/// One replayable push delivery unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Unique event id (the client's replay cursor).
    pub id: EventId,
    /// Addressing.
    pub target: PushTarget,
    /// Event name on the wire.
    pub name: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Enqueue time.
    pub enqueued_at: Timestamp,
}

impl PushEvent {
    /// Creates an event addressed to one recipient.
    #[must_use]
    pub fn to_recipient(
        recipient_id: UserId,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::to_recipients([recipient_id], name, payload)
    }

    /// Creates an event addressed to a recipient set.
    #[must_use]
    pub fn to_recipients(
        recipient_ids: impl IntoIterator<Item = UserId>,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::generate(),
            target: PushTarget::Recipients {
                ids: recipient_ids.into_iter().collect(),
            },
            name: name.into(),
            payload,
            enqueued_at: Timestamp::now(),
        }
    }

    /// Creates a broadcast event.
    #[must_use]
    pub fn broadcast(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::generate(),
            target: PushTarget::Broadcast,
            name: name.into(),
            payload,
            enqueued_at: Timestamp::now(),
        }
    }

    /// Returns true if the event is a broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self.target, PushTarget::Broadcast)
    }

    /// Returns true if the event is addressed to the recipient, directly or
    /// via broadcast.
    #[must_use]
    pub fn is_receivable(&self, recipient_id: UserId) -> bool {
        match &self.target {
            PushTarget::Broadcast => true,
            PushTarget::Recipients { ids } => ids.contains(&recipient_id),
        }
    }
}
