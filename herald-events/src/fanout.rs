//! Relay consumers resolving events into per-recipient notifications.
//!
//! One handler per relayed topic. Handlers must tolerate at-least-once
//! redelivery: a redelivered message can create duplicate notification
//! records, and this layer deliberately does not deduplicate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use herald_core::error::{HeraldError, RelayError};
use herald_core::store::{NotificationKind, RecipientDirectory};
use herald_core::types::UserId;

use crate::event::{ChannelVisibility, DomainEvent, EventKind};
use crate::notify::NotificationService;
use crate::relay::{RelayConsumer, RelayEnvelope, RelayHandler};

fn unexpected_variant(topic: &str, event: &DomainEvent) -> HeraldError {
    RelayError::HandlerFailed {
        topic: topic.to_string(),
        reason: format!("unexpected event variant '{}'", event.kind()),
    }
    .into()
}

/// Fans a committed message out to every notifiable channel member.
pub struct NewMessageHandler {
    directory: Arc<dyn RecipientDirectory>,
    notifications: Arc<NotificationService>,
}

#[async_trait]
impl RelayHandler for NewMessageHandler {
    fn name(&self) -> &str {
        "notify.new_message"
    }

    async fn handle(&self, envelope: RelayEnvelope) -> Result<(), HeraldError> {
        let DomainEvent::NewMessage { message, .. } = envelope.event else {
            return Err(unexpected_variant("new_message", &envelope.event));
        };

        info!(
            channel = %message.channel_id,
            message = %message.id,
            "Handling new-message fan-out"
        );

        // Everyone in the channel with notifications on, minus the author.
        let recipients: Vec<UserId> = self
            .directory
            .notifiable_members(message.channel_id)
            .await?
            .into_iter()
            .filter(|id| *id != message.author_id)
            .collect();

        let title = match message.channel_visibility {
            ChannelVisibility::Public => {
                format!("{} (# {})", message.author_name, message.channel_name)
            }
            ChannelVisibility::Private => message.author_name.clone(),
        };

        self.notifications
            .create_all(
                &recipients,
                title,
                message.content.clone(),
                NotificationKind::NewMessage,
                Some(message.channel_id.as_uuid()),
            )
            .await?;

        info!(
            channel = %message.channel_id,
            recipients = recipients.len(),
            "New-message fan-out complete"
        );
        Ok(())
    }
}

/// Notifies a user whose role was changed.
pub struct RoleChangedHandler {
    notifications: Arc<NotificationService>,
}

#[async_trait]
impl RelayHandler for RoleChangedHandler {
    fn name(&self) -> &str {
        "notify.role_changed"
    }

    async fn handle(&self, envelope: RelayEnvelope) -> Result<(), HeraldError> {
        let DomainEvent::RoleChanged { change, .. } = envelope.event else {
            return Err(unexpected_variant("role_changed", &envelope.event));
        };

        info!(user = %change.user_id, new_role = %change.new_role, "Handling role-change notification");

        self.notifications
            .create(
                change.user_id,
                format!(
                    "Role changed: {} -> {}",
                    change.previous_role, change.new_role
                ),
                format!(
                    "Your role was changed to '{}' by an administrator.",
                    change.new_role
                ),
                NotificationKind::RoleChanged,
                Some(change.user_id.as_uuid()),
            )
            .await?;
        Ok(())
    }
}

/// Notifies the principal whose async task exhausted its retries.
pub struct TaskFailedHandler {
    notifications: Arc<NotificationService>,
}

#[async_trait]
impl RelayHandler for TaskFailedHandler {
    fn name(&self) -> &str {
        "notify.async_task_failed"
    }

    async fn handle(&self, envelope: RelayEnvelope) -> Result<(), HeraldError> {
        let DomainEvent::AsyncTaskFailed {
            failure, principal, ..
        } = envelope.event
        else {
            return Err(unexpected_variant("async_task_failed", &envelope.event));
        };

        let Some(receiver_id) = principal else {
            // No resolvable principal: the failure is already recorded, so
            // drop the notification rather than raise.
            warn!(
                task = %failure.task_name,
                request_id = %failure.request_id,
                "Task failure has no resolvable principal, dropping notification"
            );
            return Ok(());
        };

        self.notifications
            .create(
                receiver_id,
                format!("Async task failed: {}", failure.task_name),
                format!(
                    "Request id: {}\nReason: {}",
                    failure.request_id, failure.failure_reason
                ),
                NotificationKind::AsyncFailed,
                None,
            )
            .await?;
        Ok(())
    }
}

/// Attaches the standard fan-out handlers to their topics.
pub fn attach_fanout(
    consumer: &RelayConsumer,
    directory: Arc<dyn RecipientDirectory>,
    notifications: Arc<NotificationService>,
) -> Vec<JoinHandle<()>> {
    vec![
        consumer.attach(
            EventKind::NewMessage,
            Arc::new(NewMessageHandler {
                directory,
                notifications: Arc::clone(&notifications),
            }),
        ),
        consumer.attach(
            EventKind::RoleChanged,
            Arc::new(RoleChangedHandler {
                notifications: Arc::clone(&notifications),
            }),
        ),
        consumer.attach(
            EventKind::AsyncTaskFailed,
            Arc::new(TaskFailedHandler { notifications }),
        ),
    ]
}
