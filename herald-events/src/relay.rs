//! Event relay.
//!
//! Bridges selected domain events onto a durable, partition-ordered
//! transport for cross-process consumers. The transport itself is a port:
//! production wires a broker client behind [`RelayTransport`], tests and
//! local runs use [`InMemoryRelay`]. Ordering contract: all messages with
//! one partition key are handled by one consumer lane in publish order
//! (the in-memory transport keeps one lane per topic, which is stricter).
//!
//! Delivery is at-least-once. Consumer handlers run through the bounded
//! retry policy; exhaustion routes to failure capture and stops - there is
//! no dead-letter queue.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use herald_core::context::TaskContext;
use herald_core::error::{HeraldError, RelayError};
use herald_core::types::RequestId;

use crate::bus::{DeliveryMode, EventBus, EventHandler};
use crate::event::{DomainEvent, EventKind};
use crate::failure::FailureCapture;
use crate::retry::{RetryConfig, RetryPolicy};

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Prefix for topic names (`<prefix>.<event_kind>`).
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Retry configuration for consumer handlers.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_topic_prefix() -> String {
    "herald".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            retry: RetryConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Returns the topic name for an event kind.
    #[must_use]
    pub fn topic(&self, kind: EventKind) -> String {
        format!("{}.{}", self.topic_prefix, kind)
    }
}

/// Wire envelope carried by the transport.
///
/// The request id of the publishing task rides along so consumer-side logs
/// and failure records correlate with the originating request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// The serialized domain event.
    pub event: DomainEvent,
    /// Correlation id captured at publish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// One message on a relay topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Topic name.
    pub topic: String,
    /// Partition key (string form of the event's subject id).
    pub key: String,
    /// JSON-encoded [`RelayEnvelope`].
    pub payload: String,
}

/// Port over the durable relay transport.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Publishes one message to its topic.
    async fn publish(&self, message: RelayMessage) -> Result<(), RelayError>;

    /// Opens a consumer lane for one topic.
    ///
    /// Messages arrive in publish order per topic.
    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<RelayMessage>;
}

/// In-memory relay transport for tests and local runs.
///
/// Keeps a log of everything published so tests can assert on topics and
/// partition keys.
#[derive(Default)]
pub struct InMemoryRelay {
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<RelayMessage>>>,
    published: RwLock<Vec<RelayMessage>>,
}

impl InMemoryRelay {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all messages published to `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<RelayMessage> {
        self.published
            .read()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns the total number of published messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.published.read().len()
    }
}

#[async_trait]
impl RelayTransport for InMemoryRelay {
    async fn publish(&self, message: RelayMessage) -> Result<(), RelayError> {
        self.published.write().push(message.clone());
        if let Some(mut lanes) = self.subscribers.get_mut(&message.topic) {
            lanes.retain(|tx| tx.send(message.clone()).is_ok());
        }
        debug!(topic = %message.topic, key = %message.key, "Relay message published");
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<RelayMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(topic.to_string()).or_default().push(tx);
        rx
    }
}

/// Publisher side: bridges bus events onto the transport.
///
/// Registered after-commit for `NewMessage` and `RoleChanged` and immediate
/// for `AsyncTaskFailed`. A publish failure is logged and never blocks or
/// fails the publishing caller.
pub struct RelayBridge {
    transport: Arc<dyn RelayTransport>,
    config: RelayConfig,
}

impl RelayBridge {
    /// Creates a bridge over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn RelayTransport>, config: RelayConfig) -> Arc<Self> {
        Arc::new(Self { transport, config })
    }

    /// Registers the bridge on the bus for the relayed event kinds.
    pub fn register(self: Arc<Self>, bus: &EventBus) {
        bus.subscribe(
            EventKind::NewMessage,
            DeliveryMode::AfterCommit,
            Arc::clone(&self) as Arc<dyn EventHandler>,
        );
        bus.subscribe(
            EventKind::RoleChanged,
            DeliveryMode::AfterCommit,
            Arc::clone(&self) as Arc<dyn EventHandler>,
        );
        bus.subscribe(
            EventKind::AsyncTaskFailed,
            DeliveryMode::Immediate,
            self as Arc<dyn EventHandler>,
        );
    }
}

#[async_trait]
impl EventHandler for RelayBridge {
    fn name(&self) -> &str {
        "relay-bridge"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
        let topic = self.config.topic(event.kind());
        let envelope = RelayEnvelope {
            event: event.clone(),
            request_id: TaskContext::current().request_id().cloned(),
        };

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                error!(topic = %topic, error = %err, "Relay envelope serialization failed");
                return Ok(());
            }
        };

        let message = RelayMessage {
            topic: topic.clone(),
            key: event.subject_id(),
            payload,
        };
        match self.transport.publish(message).await {
            Ok(()) => {
                info!(topic = %topic, key = %event.subject_id(), "Event relayed");
            }
            Err(err) => {
                error!(topic = %topic, error = %err, "Relay publish failed");
            }
        }

        // Relay failures never propagate to the publishing caller.
        Ok(())
    }
}

/// Consumer-side handler for one relay topic.
#[async_trait]
pub trait RelayHandler: Send + Sync {
    /// Returns the handler name (used in logs and failure records).
    fn name(&self) -> &str;

    /// Handles one decoded envelope. Must tolerate redelivery.
    async fn handle(&self, envelope: RelayEnvelope) -> Result<(), HeraldError>;
}

/// Consumer side: drives topic lanes through retry and failure capture.
pub struct RelayConsumer {
    transport: Arc<dyn RelayTransport>,
    config: RelayConfig,
    retry: RetryPolicy,
    failure: Arc<FailureCapture>,
}

impl RelayConsumer {
    /// Creates a consumer over the given transport.
    #[must_use]
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        config: RelayConfig,
        failure: Arc<FailureCapture>,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            transport,
            config,
            retry,
            failure,
        }
    }

    /// Attaches a handler to the topic for `kind` and spawns its lane.
    ///
    /// Messages are processed sequentially, so all events about one subject
    /// are handled in publish order. Each message gets up to the configured
    /// attempt budget; decoding failures count as attempt failures, and an
    /// exhausted message is recorded and skipped (at-least-once, no
    /// dead-letter queue).
    pub fn attach(&self, kind: EventKind, handler: Arc<dyn RelayHandler>) -> JoinHandle<()> {
        let topic = self.config.topic(kind);
        let mut lane = self.transport.subscribe(&topic);
        let retry = self.retry.clone();
        let failure = Arc::clone(&self.failure);

        info!(topic = %topic, handler = handler.name(), "Relay consumer attached");

        tokio::spawn(async move {
            while let Some(message) = lane.recv().await {
                Self::process(&topic, &retry, &failure, &handler, message).await;
            }
            debug!(topic = %topic, "Relay consumer lane closed");
        })
    }

    async fn process(
        topic: &str,
        retry: &RetryPolicy,
        failure: &FailureCapture,
        handler: &Arc<dyn RelayHandler>,
        message: RelayMessage,
    ) {
        // Best-effort correlation id, so even an undecodable message gets a
        // traceable failure record.
        let request_id = serde_json::from_str::<RelayEnvelope>(&message.payload)
            .ok()
            .and_then(|e| e.request_id);

        let result = retry
            .run(handler.name(), |_attempt| {
                let payload = message.payload.clone();
                let topic = topic.to_string();
                let handler = Arc::clone(handler);
                async move {
                    let envelope: RelayEnvelope =
                        serde_json::from_str(&payload).map_err(|err| {
                            HeraldError::from(RelayError::Decode {
                                topic: topic.clone(),
                                reason: err.to_string(),
                            })
                        })?;

                    let mut context = TaskContext::empty();
                    if let Some(id) = &envelope.request_id {
                        context = context.with_request_id(id.clone());
                    }
                    context.scope(handler.handle(envelope)).await
                }
            })
            .await;

        if let Err(exhausted) = result {
            error!(
                topic = %topic,
                key = %message.key,
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "Relay handler exhausted, capturing failure"
            );

            let mut context = TaskContext::empty();
            if let Some(id) = request_id {
                context = context.with_request_id(id);
            }
            context
                .scope(failure.record(
                    handler.name(),
                    format!(
                        "message on '{}' (key {}) failed: {}",
                        topic, message.key, exhausted.last_error
                    ),
                ))
                .await;
        }
    }
}
