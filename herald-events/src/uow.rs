//! Unit of work gating after-commit event delivery.
//!
//! A [`UnitOfWork`] stands in for the database transaction surrounding a
//! mutation. Events published through it fire their immediate handlers
//! right away, while after-commit handlers are queued until [`commit`]
//! drains them onto the event pool. [`rollback`] - or dropping the unit of
//! work without committing - discards the queue with zero handler
//! invocations.
//!
//! [`commit`]: UnitOfWork::commit
//! [`rollback`]: UnitOfWork::rollback

use std::sync::Arc;

use tracing::debug;

use crate::bus::{DeliveryMode, EventBus};
use crate::event::DomainEvent;

/// One commit-gated publication scope.
pub struct UnitOfWork {
    bus: Arc<EventBus>,
    pending: Vec<DomainEvent>,
    closed: bool,
}

impl UnitOfWork {
    pub(crate) fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Publishes an event within this unit of work.
    ///
    /// Immediate handlers fire inline; after-commit handlers are deferred
    /// until [`UnitOfWork::commit`].
    pub async fn publish(&mut self, event: DomainEvent) {
        self.bus.note_published();
        self.bus.dispatch(&event, DeliveryMode::Immediate).await;
        self.pending.push(event);
    }

    /// Returns how many events are queued for after-commit delivery.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Commits: drains the queue onto the event pool.
    ///
    /// Each queued event is submitted with the committing task's ambient
    /// context; the after-commit handlers themselves run on pool workers,
    /// never the committing task (unless the pool backpressures).
    pub async fn commit(mut self) {
        self.closed = true;
        let events = std::mem::take(&mut self.pending);
        debug!(events = events.len(), "Unit of work committed");

        for event in events {
            let bus = Arc::clone(&self.bus);
            self.bus
                .event_pool()
                .submit("bus.after_commit", async move {
                    bus.dispatch(&event, DeliveryMode::AfterCommit).await;
                })
                .await;
        }
    }

    /// Rolls back: discards the queue with zero handler invocations.
    pub fn rollback(mut self) {
        self.closed = true;
        let discarded = self.pending.len();
        self.pending.clear();
        debug!(discarded, "Unit of work rolled back");
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.closed && !self.pending.is_empty() {
            debug!(
                discarded = self.pending.len(),
                "Unit of work dropped without commit, discarding after-commit events"
            );
        }
    }
}
