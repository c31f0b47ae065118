//! Notification record storage port.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::types::{NotificationId, Timestamp, UserId};

/// Kind of a persisted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A new message arrived in a subscribed channel.
    NewMessage,
    /// The receiver's role was changed.
    RoleChanged,
    /// An async task submitted by the receiver failed.
    AsyncFailed,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewMessage => write!(f, "new_message"),
            Self::RoleChanged => write!(f, "role_changed"),
            Self::AsyncFailed => write!(f, "async_failed"),
        }
    }
}

/// One durable per-recipient notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Record id.
    pub id: NotificationId,
    /// Receiver of the notification.
    pub receiver_id: UserId,
    /// Short title.
    pub title: String,
    /// Body content.
    pub content: String,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Subject the notification points at (channel, user or content id),
    /// if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Uuid>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl NotificationRecord {
    /// Creates a new record with a fresh id and the current time.
    #[must_use]
    pub fn new(
        receiver_id: UserId,
        title: impl Into<String>,
        content: impl Into<String>,
        kind: NotificationKind,
        target_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            receiver_id,
            title: title.into(),
            content: content.into(),
            kind,
            target_id,
            created_at: Timestamp::now(),
        }
    }
}

/// Port over the notification record backend.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persists one record.
    async fn insert(&self, record: NotificationRecord) -> Result<(), StorageError>;

    /// Persists a batch of records.
    async fn insert_all(&self, records: Vec<NotificationRecord>) -> Result<(), StorageError>;

    /// Returns all records for the receiver, newest first.
    async fn find_by_receiver(
        &self,
        receiver_id: UserId,
    ) -> Result<Vec<NotificationRecord>, StorageError>;

    /// Deletes the record only if it is owned by `receiver_id`.
    ///
    /// Returns whether a row was affected. A missing id and a wrong owner
    /// are indistinguishable to the caller.
    async fn delete_owned(
        &self,
        id: NotificationId,
        receiver_id: UserId,
    ) -> Result<bool, StorageError>;
}

/// In-memory notification store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    records: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryNotificationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, record: NotificationRecord) -> Result<(), StorageError> {
        self.records.write().push(record);
        Ok(())
    }

    async fn insert_all(&self, records: Vec<NotificationRecord>) -> Result<(), StorageError> {
        self.records.write().extend(records);
        Ok(())
    }

    async fn find_by_receiver(
        &self,
        receiver_id: UserId,
    ) -> Result<Vec<NotificationRecord>, StorageError> {
        let records = self.records.read();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.receiver_id == receiver_id)
            .cloned()
            .collect())
    }

    async fn delete_owned(
        &self,
        id: NotificationId,
        receiver_id: UserId,
    ) -> Result<bool, StorageError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| !(r.id == id && r.receiver_id == receiver_id));
        Ok(records.len() != before)
    }
}
