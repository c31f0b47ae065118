//! In-process domain event bus.
//!
//! Typed publish/subscribe over [`DomainEvent`]. Handlers register for one
//! event kind in one of two delivery modes:
//!
//! - `Immediate` - fires inline on the publishing task;
//! - `AfterCommit` - fires only once the enclosing unit of work commits,
//!   and then on the event pool, never the committing task.
//!
//! One handler's failure is caught and logged and never affects sibling
//! handlers or the already-committed unit of work. Same-kind handlers run
//! in registration order; no ordering is guaranteed across kinds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use herald_core::error::HeraldError;

use crate::event::{DomainEvent, EventKind};
use crate::pool::TaskPool;
use crate::uow::UnitOfWork;

/// Delivery mode of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Handler fires inline when the event is published.
    Immediate,
    /// Handler fires on the event pool after the unit of work commits.
    AfterCommit,
}

/// Domain event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler name (used in logs).
    fn name(&self) -> &str;

    /// Called for each delivered event.
    async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError>;
}

struct Subscription {
    handler: Arc<dyn EventHandler>,
    mode: DeliveryMode,
}

/// In-process typed event bus.
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    event_pool: Arc<TaskPool>,
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    self_ref: Weak<EventBus>,
}

impl EventBus {
    /// Creates a bus dispatching after-commit work onto `event_pool`.
    #[must_use]
    pub fn new(event_pool: Arc<TaskPool>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            subscriptions: RwLock::new(HashMap::new()),
            event_pool,
            events_published: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        })
    }

    /// Registers a handler for one event kind.
    pub fn subscribe(&self, kind: EventKind, mode: DeliveryMode, handler: Arc<dyn EventHandler>) {
        info!(kind = %kind, handler = handler.name(), mode = ?mode, "Handler registered");
        self.subscriptions
            .write()
            .entry(kind)
            .or_default()
            .push(Subscription { handler, mode });
    }

    /// Opens a unit of work gating after-commit delivery.
    #[must_use]
    pub fn begin(&self) -> UnitOfWork {
        let bus = self
            .self_ref
            .upgrade()
            .expect("event bus is owned by an Arc");
        UnitOfWork::new(bus)
    }

    /// Publishes an event outside any unit of work.
    ///
    /// Immediate handlers fire inline; with no unit of work to gate them,
    /// after-commit handlers fire inline too (the mutation is treated as
    /// auto-committed).
    pub async fn publish(&self, event: DomainEvent) {
        self.note_published();
        self.dispatch(&event, DeliveryMode::Immediate).await;
        self.dispatch(&event, DeliveryMode::AfterCommit).await;
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().values().map(Vec::len).sum()
    }

    /// Returns the total number of events published.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Returns the total number of handler deliveries.
    #[must_use]
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn note_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_pool(&self) -> &Arc<TaskPool> {
        &self.event_pool
    }

    /// Delivers the event to every matching handler, isolating failures.
    pub(crate) async fn dispatch(&self, event: &DomainEvent, mode: DeliveryMode) {
        let kind = event.kind();

        // Snapshot under the lock; never hold it across a handler call.
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .get(&kind)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| s.mode == mode)
                        .map(|s| Arc::clone(&s.handler))
                        .collect()
                })
                .unwrap_or_default()
        };

        for handler in handlers {
            match handler.handle(event).await {
                Ok(()) => {
                    self.events_delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    warn!(
                        kind = %kind,
                        handler = handler.name(),
                        error = %error,
                        "Event handler failed"
                    );
                }
            }
        }

        debug!(kind = %kind, mode = ?mode, "Event dispatched");
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.events_published())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use herald_core::error::RelayError;
    use herald_core::types::UserId;
    use std::sync::atomic::AtomicUsize;

    pub(crate) fn test_bus() -> Arc<EventBus> {
        let pool = Arc::new(TaskPool::new("event", PoolConfig::event()));
        EventBus::new(pool)
    }

    pub(crate) struct CountingHandler {
        name: String,
        count: AtomicUsize,
        notify: tokio::sync::Notify,
    }

    impl CountingHandler {
        pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                count: AtomicUsize::new(0),
                notify: tokio::sync::Notify::new(),
            })
        }

        pub(crate) fn count(&self) -> usize {
            self.count.load(Ordering::Relaxed)
        }

        pub(crate) async fn wait(&self) {
            tokio::time::timeout(std::time::Duration::from_secs(1), self.notify.notified())
                .await
                .expect("handler was not invoked");
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<(), HeraldError> {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<(), HeraldError> {
            Err(RelayError::HandlerFailed {
                topic: "test".to_string(),
                reason: "boom".to_string(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn test_immediate_handler_fires_inline() {
        let bus = test_bus();
        let handler = CountingHandler::new("counter");
        bus.subscribe(
            EventKind::UserMutation,
            DeliveryMode::Immediate,
            handler.clone(),
        );

        bus.publish(DomainEvent::user_mutation(UserId::generate()))
            .await;

        assert_eq!(handler.count(), 1);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_delivered(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated() {
        let bus = test_bus();
        let surviving = CountingHandler::new("surviving");
        bus.subscribe(
            EventKind::UserMutation,
            DeliveryMode::Immediate,
            Arc::new(FailingHandler),
        );
        bus.subscribe(
            EventKind::UserMutation,
            DeliveryMode::Immediate,
            surviving.clone(),
        );

        bus.publish(DomainEvent::user_mutation(UserId::generate()))
            .await;

        assert_eq!(surviving.count(), 1);
    }

    #[tokio::test]
    async fn test_same_kind_handlers_run_in_registration_order() {
        struct OrderedHandler {
            name: String,
            order: Arc<parking_lot::Mutex<Vec<String>>>,
        }

        #[async_trait]
        impl EventHandler for OrderedHandler {
            fn name(&self) -> &str {
                &self.name
            }

            async fn handle(&self, _event: &DomainEvent) -> Result<(), HeraldError> {
                self.order.lock().push(self.name.clone());
                Ok(())
            }
        }

        let bus = test_bus();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            bus.subscribe(
                EventKind::UserMutation,
                DeliveryMode::Immediate,
                Arc::new(OrderedHandler {
                    name: name.to_string(),
                    order: Arc::clone(&order),
                }),
            );
        }

        bus.publish(DomainEvent::user_mutation(UserId::generate()))
            .await;

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_other_kinds_are_not_delivered() {
        let bus = test_bus();
        let handler = CountingHandler::new("counter");
        bus.subscribe(
            EventKind::PublicChannelMutation,
            DeliveryMode::Immediate,
            handler.clone(),
        );

        bus.publish(DomainEvent::user_mutation(UserId::generate()))
            .await;

        assert_eq!(handler.count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_unit_of_work_fires_after_commit_inline() {
        let bus = test_bus();
        let handler = CountingHandler::new("after-commit");
        bus.subscribe(
            EventKind::UserMutation,
            DeliveryMode::AfterCommit,
            handler.clone(),
        );

        bus.publish(DomainEvent::user_mutation(UserId::generate()))
            .await;

        assert_eq!(handler.count(), 1);
    }
}
