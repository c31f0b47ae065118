//! Durable capture of exhausted async tasks.
//!
//! When a monitored task runs out of retries the failure is recorded
//! before anything user-facing happens, then re-injected into the pipeline
//! as an [`DomainEvent::AsyncTaskFailed`] so fan-out can notify the
//! responsible principal. The principal and correlation id come from the
//! ambient context captured when the task was *submitted* - failure
//! surfaces on a worker, but the pool wrapper restored the submitter's
//! context there.

use std::sync::Arc;

use tracing::{error, info};

use herald_core::context::TaskContext;
use herald_core::store::{AsyncTaskFailureRecord, FailureStore};
use herald_core::types::RequestId;

use crate::bus::EventBus;
use crate::event::DomainEvent;

/// Records exhausted async tasks and re-injects them as events.
pub struct FailureCapture {
    store: Arc<dyn FailureStore>,
    bus: Arc<EventBus>,
}

impl FailureCapture {
    /// Creates a capture writing to `store` and republishing on `bus`.
    #[must_use]
    pub fn new(store: Arc<dyn FailureStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Records one exhausted task.
    ///
    /// Persists the failure record, then publishes `AsyncTaskFailed`
    /// (immediate mode) carrying the submission-time principal when one is
    /// resolvable. If the record itself cannot be persisted the failure is
    /// logged and nothing is published - surfacing never precedes the
    /// durable record.
    pub async fn record(&self, task_name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        let context = TaskContext::current();
        let request_id = context
            .request_id()
            .cloned()
            .unwrap_or_else(|| RequestId::from_string("unknown"));

        let record = AsyncTaskFailureRecord::new(task_name, request_id, reason);
        info!(
            task = task_name,
            request_id = %record.request_id,
            reason = %record.failure_reason,
            "Recording async task failure"
        );

        if let Err(err) = self.store.append(record.clone()).await {
            error!(task = task_name, error = %err, "Failed to persist async task failure");
            return;
        }

        let principal = context.principal().map(|p| p.user_id);
        self.bus
            .publish(DomainEvent::async_task_failed(record, principal))
            .await;
    }
}

impl std::fmt::Debug for FailureCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureCapture").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::{CountingHandler, test_bus};
    use crate::bus::DeliveryMode;
    use crate::event::EventKind;
    use herald_core::context::{Principal, Role};
    use herald_core::store::InMemoryFailureStore;
    use herald_core::types::UserId;

    #[tokio::test]
    async fn test_record_persists_and_republishes() {
        let bus = test_bus();
        let store = Arc::new(InMemoryFailureStore::new());
        let handler = CountingHandler::new("task-failed");
        bus.subscribe(
            EventKind::AsyncTaskFailed,
            DeliveryMode::Immediate,
            handler.clone(),
        );

        let capture = FailureCapture::new(store.clone(), bus);
        capture.record("content.upload", "timeout").await;

        assert_eq!(store.len(), 1);
        assert_eq!(handler.count(), 1);

        let records = store.find_all().await.unwrap();
        assert_eq!(records[0].task_name, "content.upload");
        assert_eq!(records[0].request_id.as_str(), "unknown");
    }

    #[tokio::test]
    async fn test_record_uses_submission_context() {
        struct Capture {
            seen: Arc<parking_lot::Mutex<Option<UserId>>>,
        }

        #[async_trait::async_trait]
        impl crate::bus::EventHandler for Capture {
            fn name(&self) -> &str {
                "capture"
            }

            async fn handle(
                &self,
                event: &DomainEvent,
            ) -> Result<(), herald_core::error::HeraldError> {
                if let DomainEvent::AsyncTaskFailed { principal, .. } = event {
                    *self.seen.lock() = *principal;
                }
                Ok(())
            }
        }

        let bus = test_bus();
        let store = Arc::new(InMemoryFailureStore::new());
        let seen = Arc::new(parking_lot::Mutex::new(None));
        bus.subscribe(
            EventKind::AsyncTaskFailed,
            DeliveryMode::Immediate,
            Arc::new(Capture {
                seen: Arc::clone(&seen),
            }),
        );

        let capture = Arc::new(FailureCapture::new(store.clone(), bus));
        let user = UserId::generate();
        let context = TaskContext::empty()
            .with_principal(Principal::new(user, Role::User))
            .with_request_id(herald_core::types::RequestId::from_string("req-9"));

        let capture_ref = Arc::clone(&capture);
        context
            .scope(async move {
                capture_ref.record("content.upload", "disk full").await;
            })
            .await;

        assert_eq!(*seen.lock(), Some(user));
        let records = store.find_all().await.unwrap();
        assert_eq!(records[0].request_id.as_str(), "req-9");
    }
}
