//! Bus handlers bridging domain events to push delivery.
//!
//! One handler, registered per event kind: notification events become
//! per-recipient pushes, channel/user mutations become refresh broadcasts,
//! and content status updates broadcast immediately (they carry no
//! transactional state to wait for). Everything else rides after-commit.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use herald_core::error::{DeliveryError, HeraldError};
use herald_events::bus::{DeliveryMode, EventBus, EventHandler};
use herald_events::event::{DomainEvent, EventKind};

use crate::service::PushService;

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, HeraldError> {
    serde_json::to_value(value).map_err(|err| {
        DeliveryError::Encode {
            reason: err.to_string(),
        }
        .into()
    })
}

/// Routes committed domain events into the push service.
pub struct PushHandler {
    push: Arc<PushService>,
}

impl PushHandler {
    /// Registers the handler for every push-driving event kind.
    pub fn register(bus: &EventBus, push: Arc<PushService>) {
        let handler = Arc::new(Self { push });
        for kind in [
            EventKind::NotificationCreated,
            EventKind::MultipleNotificationCreated,
            EventKind::PublicChannelMutation,
            EventKind::PrivateChannelCreated,
            EventKind::UserMutation,
        ] {
            bus.subscribe(
                kind,
                DeliveryMode::AfterCommit,
                Arc::clone(&handler) as Arc<dyn EventHandler>,
            );
        }
        bus.subscribe(
            EventKind::ContentStatusUpdated,
            DeliveryMode::Immediate,
            handler as Arc<dyn EventHandler>,
        );
    }
}

#[async_trait]
impl EventHandler for PushHandler {
    fn name(&self) -> &str {
        "push"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
        match event {
            DomainEvent::NotificationCreated { notification, .. } => {
                self.push.send(
                    notification.receiver_id,
                    "notifications",
                    encode(notification)?,
                );
            }
            DomainEvent::MultipleNotificationCreated { notifications, .. } => {
                for notification in notifications {
                    self.push.send(
                        notification.receiver_id,
                        "notifications",
                        encode(notification)?,
                    );
                }
            }
            DomainEvent::PublicChannelMutation { channel_id, .. } => {
                self.push
                    .broadcast("channels.refresh", json!({ "channelId": channel_id }));
            }
            DomainEvent::PrivateChannelCreated {
                channel,
                participant_ids,
                ..
            } => {
                self.push
                    .send_to_all(participant_ids, "channels.refresh", encode(channel)?);
            }
            DomainEvent::UserMutation { user_id, .. } => {
                self.push
                    .broadcast("users.refresh", json!({ "userId": user_id }));
            }
            DomainEvent::ContentStatusUpdated {
                content_id, status, ..
            } => {
                self.push.broadcast(
                    "binaryContents.status",
                    json!({ "contentId": content_id, "status": status }),
                );
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::store::{NotificationKind, NotificationRecord};
    use herald_core::types::{ChannelId, ContentId, UserId};
    use herald_events::event::{ChannelView, ChannelVisibility, ContentStatus};
    use herald_events::pool::{PoolConfig, TaskPool};
    use std::time::Duration;

    use crate::config::PushConfig;
    use crate::service::PushSubscription;

    fn wired() -> (Arc<EventBus>, Arc<PushService>) {
        let pool = Arc::new(TaskPool::new("event", PoolConfig::event()));
        let bus = EventBus::new(pool);
        let push = Arc::new(PushService::new(PushConfig::default()));
        PushHandler::register(&bus, Arc::clone(&push));
        (bus, push)
    }

    async fn expect_frame(subscription: &mut PushSubscription) -> crate::frame::PushFrame {
        tokio::time::timeout(Duration::from_secs(1), subscription.next_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
    }

    #[tokio::test]
    async fn test_notification_created_pushes_after_commit() {
        let (bus, push) = wired();
        let receiver = UserId::generate();
        let mut subscription = push.connect(receiver, None);

        let record =
            NotificationRecord::new(receiver, "title", "content", NotificationKind::NewMessage, None);
        let mut uow = bus.begin();
        uow.publish(DomainEvent::notification_created(record.clone()))
            .await;

        // Nothing before commit.
        assert_eq!(push.replay_log().len(), 0);

        uow.commit().await;
        let frame = expect_frame(&mut subscription).await;
        assert_eq!(frame.name, "notifications");
        assert_eq!(frame.data["id"], serde_json::to_value(record.id).unwrap());
    }

    #[tokio::test]
    async fn test_batch_notifications_push_per_receiver() {
        let (bus, push) = wired();
        let a = UserId::generate();
        let b = UserId::generate();
        let mut sub_a = push.connect(a, None);
        let mut sub_b = push.connect(b, None);

        let records = vec![
            NotificationRecord::new(a, "t", "c", NotificationKind::NewMessage, None),
            NotificationRecord::new(b, "t", "c", NotificationKind::NewMessage, None),
        ];
        bus.publish(DomainEvent::multiple_notifications_created(records))
            .await;

        assert_eq!(expect_frame(&mut sub_a).await.name, "notifications");
        assert_eq!(expect_frame(&mut sub_b).await.name, "notifications");
        assert_eq!(push.replay_log().len(), 2);
    }

    #[tokio::test]
    async fn test_public_channel_mutation_broadcasts_refresh() {
        let (bus, push) = wired();
        let mut subscription = push.connect(UserId::generate(), None);
        let channel_id = ChannelId::generate();

        bus.publish(DomainEvent::public_channel_mutation(channel_id))
            .await;

        let frame = expect_frame(&mut subscription).await;
        assert_eq!(frame.name, "channels.refresh");
        assert_eq!(
            frame.data["channelId"],
            serde_json::to_value(channel_id).unwrap()
        );
    }

    #[tokio::test]
    async fn test_private_channel_created_targets_participants() {
        let (bus, push) = wired();
        let participant = UserId::generate();
        let outsider = UserId::generate();
        let mut participant_sub = push.connect(participant, None);
        let mut outsider_sub = push.connect(outsider, None);

        let channel = ChannelView {
            id: ChannelId::generate(),
            name: "secret".to_string(),
            visibility: ChannelVisibility::Private,
        };
        bus.publish(DomainEvent::private_channel_created(
            channel,
            vec![participant],
        ))
        .await;

        let frame = expect_frame(&mut participant_sub).await;
        assert_eq!(frame.name, "channels.refresh");

        let nothing =
            tokio::time::timeout(Duration::from_millis(50), outsider_sub.next_frame()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_user_mutation_broadcasts() {
        let (bus, push) = wired();
        let mut subscription = push.connect(UserId::generate(), None);

        bus.publish(DomainEvent::user_mutation(UserId::generate()))
            .await;

        let frame = expect_frame(&mut subscription).await;
        assert_eq!(frame.name, "users.refresh");
    }

    #[tokio::test]
    async fn test_content_status_broadcasts_before_commit() {
        let (bus, push) = wired();
        let mut subscription = push.connect(UserId::generate(), None);

        let mut uow = bus.begin();
        uow.publish(DomainEvent::content_status_updated(
            ContentId::generate(),
            ContentStatus::Waiting,
        ))
        .await;

        // Immediate mode: the frame is already out, commit pending or not.
        let frame = expect_frame(&mut subscription).await;
        assert_eq!(frame.name, "binaryContents.status");
        uow.rollback();
    }
}
