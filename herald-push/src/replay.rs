//! Bounded FIFO replay log.
//!
//! Retains the most recent push events so reconnecting clients can catch
//! up. Eviction is strictly oldest-first and happens before insertion, so
//! an append never fails on capacity. Anything evicted before a client
//! reconnects is permanently lost to that client - a documented
//! limitation, not a bug.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use herald_core::types::{EventId, UserId};

use crate::event::PushEvent;

/// Capacity-bounded FIFO of past push events.
pub struct ReplayLog {
    capacity: usize,
    events: RwLock<VecDeque<Arc<PushEvent>>>,
    total_appended: AtomicU64,
}

impl ReplayLog {
    /// Creates a log retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
            total_appended: AtomicU64::new(0),
        }
    }

    /// Appends an event, evicting oldest-first if at capacity.
    pub fn append(&self, event: PushEvent) -> Arc<PushEvent> {
        let event = Arc::new(event);
        let mut events = self.events.write();
        while events.len() >= self.capacity {
            if let Some(evicted) = events.pop_front() {
                debug!(event = %evicted.id, "Replay log full, evicting oldest event");
            }
        }
        events.push_back(Arc::clone(&event));
        self.total_appended.fetch_add(1, Ordering::Relaxed);
        event
    }

    /// Returns, in enqueue order, every retained event enqueued strictly
    /// after `last_seen` and addressed to `recipient_id`.
    ///
    /// An unknown `last_seen` - typically an id already evicted - yields
    /// nothing: the log cannot tell how much the client missed.
    #[must_use]
    pub fn events_after(&self, last_seen: EventId, recipient_id: UserId) -> Vec<Arc<PushEvent>> {
        let events = self.events.read();
        events
            .iter()
            .skip_while(|e| e.id != last_seen)
            .skip(1)
            .filter(|e| e.is_receivable(recipient_id))
            .cloned()
            .collect()
    }

    /// Returns the number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the total number of events ever appended.
    #[must_use]
    pub fn total_appended(&self) -> u64 {
        self.total_appended.load(Ordering::Relaxed)
    }

    /// Returns the retained event ids in enqueue order.
    #[must_use]
    pub fn ids(&self) -> Vec<EventId> {
        self.events.read().iter().map(|e| e.id).collect()
    }
}

impl std::fmt::Debug for ReplayLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broadcast(n: u64) -> PushEvent {
        PushEvent::broadcast("tick", json!({ "n": n }))
    }

    #[test]
    fn test_append_within_capacity() {
        let log = ReplayLog::new(100);
        for n in 0..5 {
            log.append(broadcast(n));
        }
        assert_eq!(log.len(), 5);
        assert_eq!(log.total_appended(), 5);
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let log = ReplayLog::new(3);
        let first = log.append(broadcast(0)).id;
        let ids: Vec<EventId> = (1..=3).map(|n| log.append(broadcast(n)).id).collect();

        // Exactly the 3 most recent remain, oldest evicted first.
        assert_eq!(log.len(), 3);
        assert_eq!(log.ids(), ids);
        assert!(!log.ids().contains(&first));
        assert_eq!(log.total_appended(), 4);
    }

    #[test]
    fn test_events_after_filters_and_orders() {
        let log = ReplayLog::new(100);
        let recipient = UserId::generate();
        let other = UserId::generate();

        let cursor = log.append(broadcast(0)).id;
        let direct = log
            .append(PushEvent::to_recipient(recipient, "notifications", json!({"n": 1})))
            .id;
        log.append(PushEvent::to_recipient(other, "notifications", json!({"n": 2})));
        let tick = log.append(broadcast(3)).id;

        let replayed = log.events_after(cursor, recipient);
        let ids: Vec<EventId> = replayed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![direct, tick]);
    }

    #[test]
    fn test_events_after_is_strictly_after() {
        let log = ReplayLog::new(100);
        let recipient = UserId::generate();
        let cursor = log.append(broadcast(0)).id;

        assert!(log.events_after(cursor, recipient).is_empty());
    }

    #[test]
    fn test_evicted_cursor_replays_nothing() {
        let log = ReplayLog::new(100);
        let recipient = UserId::generate();
        let cursor = log.append(broadcast(0)).id;

        // 150 broadcasts at capacity 100 push the cursor out of retention.
        for n in 1..=150 {
            log.append(broadcast(n));
        }

        assert_eq!(log.len(), 100);
        assert!(log.events_after(cursor, recipient).is_empty());
    }
}
