//! Per-channel message streams.
//!
//! The companion low-latency channel: one topic per chat channel
//! (`channels.<channelId>.messages`) delivering committed messages to
//! synchronous subscribers, parallel to the notification stream. Backed by
//! broadcast channels - a lagging subscriber observes loss rather than
//! backpressuring the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use herald_core::error::HeraldError;
use herald_core::types::ChannelId;
use herald_events::bus::{DeliveryMode, EventBus, EventHandler};
use herald_events::event::{DomainEvent, EventKind, MessageView};

const DEFAULT_STREAM_BUFFER: usize = 64;

/// Topic registry routing messages to per-channel subscribers.
#[derive(Debug)]
pub struct ChannelStreamRouter {
    topics: DashMap<ChannelId, broadcast::Sender<MessageView>>,
    buffer: usize,
}

impl ChannelStreamRouter {
    /// Creates a router with the default per-topic buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_STREAM_BUFFER)
    }

    /// Creates a router with the given per-topic buffer.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Returns the wire name of a channel's topic.
    #[must_use]
    pub fn topic_name(channel_id: ChannelId) -> String {
        format!("channels.{channel_id}.messages")
    }

    /// Subscribes to a channel's message topic.
    #[must_use]
    pub fn subscribe(&self, channel_id: ChannelId) -> broadcast::Receiver<MessageView> {
        self.topics
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Publishes a message to its channel's topic.
    ///
    /// Returns the number of subscribers it reached; a topic nobody
    /// subscribed to delivers to zero, silently.
    pub fn publish(&self, message: &MessageView) -> usize {
        self.topics
            .get(&message.channel_id)
            .map_or(0, |tx| tx.send(message.clone()).unwrap_or(0))
    }

    /// Returns the number of live subscribers of a channel's topic.
    #[must_use]
    pub fn subscriber_count(&self, channel_id: ChannelId) -> usize {
        self.topics
            .get(&channel_id)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for ChannelStreamRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus handler feeding committed messages into the channel topics.
pub struct MessageStreamHandler {
    router: Arc<ChannelStreamRouter>,
}

impl MessageStreamHandler {
    /// Registers the handler (after-commit) for new-message events.
    pub fn register(bus: &EventBus, router: Arc<ChannelStreamRouter>) {
        bus.subscribe(
            EventKind::NewMessage,
            DeliveryMode::AfterCommit,
            Arc::new(Self { router }),
        );
    }
}

#[async_trait]
impl EventHandler for MessageStreamHandler {
    fn name(&self) -> &str {
        "channel-stream"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
        if let DomainEvent::NewMessage { message, .. } = event {
            let delivered = self.router.publish(message);
            debug!(
                topic = %ChannelStreamRouter::topic_name(message.channel_id),
                delivered,
                "Message streamed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::types::{MessageId, Timestamp, UserId};
    use herald_events::event::ChannelVisibility;
    use herald_events::pool::{PoolConfig, TaskPool};
    use std::time::Duration;

    fn message_in(channel_id: ChannelId) -> MessageView {
        MessageView {
            id: MessageId::generate(),
            channel_id,
            channel_name: "general".to_string(),
            channel_visibility: ChannelVisibility::Public,
            author_id: UserId::generate(),
            author_name: "alice".to_string(),
            content: "hello".to_string(),
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn test_topic_name_format() {
        let channel_id = ChannelId::generate();
        assert_eq!(
            ChannelStreamRouter::topic_name(channel_id),
            format!("channels.{channel_id}.messages")
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_channel_subscribers_only() {
        let router = ChannelStreamRouter::new();
        let channel = ChannelId::generate();
        let other = ChannelId::generate();
        let mut subscriber = router.subscribe(channel);
        let mut other_subscriber = router.subscribe(other);

        let message = message_in(channel);
        assert_eq!(router.publish(&message), 1);

        let received = subscriber.recv().await.unwrap();
        assert_eq!(received.id, message.id);
        assert!(other_subscriber.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let router = ChannelStreamRouter::new();
        assert_eq!(router.publish(&message_in(ChannelId::generate())), 0);
    }

    #[tokio::test]
    async fn test_stream_handler_delivers_after_commit() {
        let pool = Arc::new(TaskPool::new("event", PoolConfig::event()));
        let bus = EventBus::new(pool);
        let router = Arc::new(ChannelStreamRouter::new());
        MessageStreamHandler::register(&bus, Arc::clone(&router));

        let channel = ChannelId::generate();
        let mut subscriber = router.subscribe(channel);
        let message = message_in(channel);

        let mut uow = bus.begin();
        uow.publish(DomainEvent::new_message(message.clone())).await;
        assert!(subscriber.try_recv().is_err());

        uow.commit().await;
        let received = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, message.id);
    }
}
