//! Domain event types.
//!
//! This module defines the closed set of events the pipeline reacts to.
//! Every variant is immutable once constructed and carries its creation
//! time plus a variant payload. Events about one subject share a partition
//! key ([`DomainEvent::subject_id`]) so the relay can keep them ordered.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use herald_core::store::{AsyncTaskFailureRecord, NotificationRecord};
use herald_core::types::{ChannelId, ContentId, MessageId, Timestamp, UserId};

/// Event kind enumeration for subscriptions and relay topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A chat message was created.
    NewMessage,
    /// A user's role was changed.
    RoleChanged,
    /// A private channel was created.
    PrivateChannelCreated,
    /// A public channel was created, renamed or deleted.
    PublicChannelMutation,
    /// A user profile was created, updated or deleted.
    UserMutation,
    /// One notification record was persisted.
    NotificationCreated,
    /// A batch of notification records was persisted.
    MultipleNotificationCreated,
    /// A binary content upload changed status.
    ContentStatusUpdated,
    /// A monitored async task exhausted its retries.
    AsyncTaskFailed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewMessage => write!(f, "new_message"),
            Self::RoleChanged => write!(f, "role_changed"),
            Self::PrivateChannelCreated => write!(f, "private_channel_created"),
            Self::PublicChannelMutation => write!(f, "public_channel_mutation"),
            Self::UserMutation => write!(f, "user_mutation"),
            Self::NotificationCreated => write!(f, "notification_created"),
            Self::MultipleNotificationCreated => write!(f, "multiple_notification_created"),
            Self::ContentStatusUpdated => write!(f, "content_status_updated"),
            Self::AsyncTaskFailed => write!(f, "async_task_failed"),
        }
    }
}

/// Visibility of a chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelVisibility {
    /// Joinable by anyone.
    Public,
    /// Invite-only.
    Private,
}

/// Role names as carried by role-change events.
pub use herald_core::context::Role;

/// Snapshot of a message as published after its mutation committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    /// Message id.
    pub id: MessageId,
    /// Channel the message belongs to.
    pub channel_id: ChannelId,
    /// Channel display name.
    pub channel_name: String,
    /// Channel visibility.
    pub channel_visibility: ChannelVisibility,
    /// Author id.
    pub author_id: UserId,
    /// Author display name.
    pub author_name: String,
    /// Message content.
    pub content: String,
    /// Message creation time.
    pub created_at: Timestamp,
}

/// Snapshot of a channel as published after its mutation committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelView {
    /// Channel id.
    pub id: ChannelId,
    /// Channel display name.
    pub name: String,
    /// Channel visibility.
    pub visibility: ChannelVisibility,
}

/// A role transition for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    /// Affected user.
    pub user_id: UserId,
    /// Role before the change.
    pub previous_role: Role,
    /// Role after the change.
    pub new_role: Role,
}

/// Upload status of a binary content object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Upload submitted, not finished.
    Waiting,
    /// Upload completed.
    Succeeded,
    /// Upload failed after all retries.
    Failed,
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Domain event enumeration.
///
/// A closed sum type: one payload shape per variant, dispatched by pattern
/// match. Constructors stamp the creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A chat message was created.
    NewMessage {
        /// Event creation time.
        created_at: Timestamp,
        /// The committed message.
        message: MessageView,
    },
    /// A user's role was changed.
    RoleChanged {
        /// Event creation time.
        created_at: Timestamp,
        /// The role transition.
        change: RoleChange,
    },
    /// A private channel was created.
    PrivateChannelCreated {
        /// Event creation time.
        created_at: Timestamp,
        /// The created channel.
        channel: ChannelView,
        /// Users participating in the channel.
        participant_ids: Vec<UserId>,
    },
    /// A public channel was created, renamed or deleted.
    PublicChannelMutation {
        /// Event creation time.
        created_at: Timestamp,
        /// The mutated channel.
        channel_id: ChannelId,
    },
    /// A user profile was created, updated or deleted.
    UserMutation {
        /// Event creation time.
        created_at: Timestamp,
        /// The mutated user.
        user_id: UserId,
    },
    /// One notification record was persisted.
    NotificationCreated {
        /// Event creation time.
        created_at: Timestamp,
        /// The persisted record.
        notification: NotificationRecord,
    },
    /// A batch of notification records was persisted.
    MultipleNotificationCreated {
        /// Event creation time.
        created_at: Timestamp,
        /// The persisted records.
        notifications: Vec<NotificationRecord>,
    },
    /// A binary content upload changed status.
    ContentStatusUpdated {
        /// Event creation time.
        created_at: Timestamp,
        /// The content object.
        content_id: ContentId,
        /// New status.
        status: ContentStatus,
    },
    /// A monitored async task exhausted its retries.
    AsyncTaskFailed {
        /// Event creation time.
        created_at: Timestamp,
        /// The recorded failure.
        failure: AsyncTaskFailureRecord,
        /// Principal that submitted the task, when resolvable.
        principal: Option<UserId>,
    },
}

impl DomainEvent {
    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage { .. } => EventKind::NewMessage,
            Self::RoleChanged { .. } => EventKind::RoleChanged,
            Self::PrivateChannelCreated { .. } => EventKind::PrivateChannelCreated,
            Self::PublicChannelMutation { .. } => EventKind::PublicChannelMutation,
            Self::UserMutation { .. } => EventKind::UserMutation,
            Self::NotificationCreated { .. } => EventKind::NotificationCreated,
            Self::MultipleNotificationCreated { .. } => EventKind::MultipleNotificationCreated,
            Self::ContentStatusUpdated { .. } => EventKind::ContentStatusUpdated,
            Self::AsyncTaskFailed { .. } => EventKind::AsyncTaskFailed,
        }
    }

    /// Returns the event creation time.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        match self {
            Self::NewMessage { created_at, .. }
            | Self::RoleChanged { created_at, .. }
            | Self::PrivateChannelCreated { created_at, .. }
            | Self::PublicChannelMutation { created_at, .. }
            | Self::UserMutation { created_at, .. }
            | Self::NotificationCreated { created_at, .. }
            | Self::MultipleNotificationCreated { created_at, .. }
            | Self::ContentStatusUpdated { created_at, .. }
            | Self::AsyncTaskFailed { created_at, .. } => *created_at,
        }
    }

    /// Returns the partition key derived from the event's natural subject.
    ///
    /// All events about one subject map to one key, so the relay processes
    /// them in order on one consumer lane. Batch events use their first
    /// receiver as the closest natural subject.
    #[must_use]
    pub fn subject_id(&self) -> String {
        match self {
            Self::NewMessage { message, .. } => message.id.to_string(),
            Self::RoleChanged { change, .. } => change.user_id.to_string(),
            Self::PrivateChannelCreated { channel, .. } => channel.id.to_string(),
            Self::PublicChannelMutation { channel_id, .. } => channel_id.to_string(),
            Self::UserMutation { user_id, .. } => user_id.to_string(),
            Self::NotificationCreated { notification, .. } => notification.id.to_string(),
            Self::MultipleNotificationCreated { notifications, .. } => notifications
                .first()
                .map(|n| n.receiver_id.to_string())
                .unwrap_or_else(|| "none".to_string()),
            Self::ContentStatusUpdated { content_id, .. } => content_id.to_string(),
            Self::AsyncTaskFailed { failure, .. } => failure.request_id.to_string(),
        }
    }

    /// Returns the distinct receiver set of a batch-notification event.
    ///
    /// Empty for every other variant.
    #[must_use]
    pub fn receiver_ids(&self) -> HashSet<UserId> {
        match self {
            Self::MultipleNotificationCreated { notifications, .. } => {
                notifications.iter().map(|n| n.receiver_id).collect()
            }
            _ => HashSet::new(),
        }
    }

    /// Creates a new-message event.
    #[must_use]
    pub fn new_message(message: MessageView) -> Self {
        Self::NewMessage {
            created_at: Timestamp::now(),
            message,
        }
    }

    /// Creates a role-changed event.
    #[must_use]
    pub fn role_changed(change: RoleChange) -> Self {
        Self::RoleChanged {
            created_at: Timestamp::now(),
            change,
        }
    }

    /// Creates a private-channel-created event.
    #[must_use]
    pub fn private_channel_created(channel: ChannelView, participant_ids: Vec<UserId>) -> Self {
        Self::PrivateChannelCreated {
            created_at: Timestamp::now(),
            channel,
            participant_ids,
        }
    }

    /// Creates a public-channel-mutation event.
    #[must_use]
    pub fn public_channel_mutation(channel_id: ChannelId) -> Self {
        Self::PublicChannelMutation {
            created_at: Timestamp::now(),
            channel_id,
        }
    }

    /// Creates a user-mutation event.
    #[must_use]
    pub fn user_mutation(user_id: UserId) -> Self {
        Self::UserMutation {
            created_at: Timestamp::now(),
            user_id,
        }
    }

    /// Creates a notification-created event.
    #[must_use]
    pub fn notification_created(notification: NotificationRecord) -> Self {
        Self::NotificationCreated {
            created_at: Timestamp::now(),
            notification,
        }
    }

    /// Creates a batch notification-created event.
    #[must_use]
    pub fn multiple_notifications_created(notifications: Vec<NotificationRecord>) -> Self {
        Self::MultipleNotificationCreated {
            created_at: Timestamp::now(),
            notifications,
        }
    }

    /// Creates a content-status-updated event.
    #[must_use]
    pub fn content_status_updated(content_id: ContentId, status: ContentStatus) -> Self {
        Self::ContentStatusUpdated {
            created_at: Timestamp::now(),
            content_id,
            status,
        }
    }

    /// Creates an async-task-failed event.
    #[must_use]
    pub fn async_task_failed(failure: AsyncTaskFailureRecord, principal: Option<UserId>) -> Self {
        Self::AsyncTaskFailed {
            created_at: Timestamp::now(),
            failure,
            principal,
        }
    }
}
