//! Content upload supervision.
//!
//! The pipeline never looks inside the object storage backend - it only
//! observes whether a put succeeded or failed. Uploads run on the content
//! pool under the retry policy; every status transition is published as a
//! `ContentStatusUpdated` event, and an exhausted upload is handed to
//! failure capture with the uploader's submission-time context intact.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use herald_core::error::StorageError;
use herald_core::types::ContentId;

use crate::bus::EventBus;
use crate::event::{ContentStatus, DomainEvent};
use crate::failure::FailureCapture;
use crate::pool::TaskPool;
use crate::retry::RetryPolicy;

/// Port over the object storage backend.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Stores one object under its content id.
    async fn put(&self, content_id: ContentId, bytes: &[u8]) -> Result<(), StorageError>;
}

/// In-memory content storage for tests and local runs.
///
/// Can be primed to fail a number of puts, to exercise the retry path.
#[derive(Debug, Default)]
pub struct InMemoryContentStorage {
    objects: DashMap<ContentId, Vec<u8>>,
    fail_remaining: AtomicU32,
}

impl InMemoryContentStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` puts fail with a transient error.
    pub fn fail_times(&self, times: u32) {
        self.fail_remaining.store(times, Ordering::Relaxed);
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the object is stored.
    #[must_use]
    pub fn contains(&self, content_id: ContentId) -> bool {
        self.objects.contains_key(&content_id)
    }
}

#[async_trait]
impl ContentStorage for InMemoryContentStorage {
    async fn put(&self, content_id: ContentId, bytes: &[u8]) -> Result<(), StorageError> {
        if self
            .fail_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Unavailable {
                reason: "injected failure".to_string(),
            });
        }
        self.objects.insert(content_id, bytes.to_vec());
        debug!(content = %content_id, "Object stored");
        Ok(())
    }
}

/// Supervises async uploads on the content pool.
pub struct UploadSupervisor {
    storage: Arc<dyn ContentStorage>,
    pool: Arc<TaskPool>,
    retry: RetryPolicy,
    failure: Arc<FailureCapture>,
    bus: Arc<EventBus>,
}

impl UploadSupervisor {
    /// Creates a supervisor uploading to `storage` on `pool`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn ContentStorage>,
        pool: Arc<TaskPool>,
        retry: RetryPolicy,
        failure: Arc<FailureCapture>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            storage,
            pool,
            retry,
            failure,
            bus,
        }
    }

    /// Submits one upload.
    ///
    /// Publishes `Waiting` immediately, then `Succeeded` or `Failed` from
    /// the worker once the attempt budget resolves. Exhaustion records one
    /// failure (with the submitter's ambient context) before the `Failed`
    /// status surfaces.
    pub async fn upload(&self, content_id: ContentId, bytes: Vec<u8>) {
        self.bus
            .publish(DomainEvent::content_status_updated(
                content_id,
                ContentStatus::Waiting,
            ))
            .await;

        let storage = Arc::clone(&self.storage);
        let retry = self.retry.clone();
        let failure = Arc::clone(&self.failure);
        let bus = Arc::clone(&self.bus);
        let bytes = Arc::new(bytes);

        self.pool
            .submit("content.upload", async move {
                let result = retry
                    .run("content.upload", |attempt| {
                        let storage = Arc::clone(&storage);
                        let bytes = Arc::clone(&bytes);
                        async move {
                            info!(content = %content_id, attempt, "Uploading content");
                            storage.put(content_id, &bytes).await
                        }
                    })
                    .await;

                match result {
                    Ok(()) => {
                        info!(content = %content_id, "Upload succeeded");
                        bus.publish(DomainEvent::content_status_updated(
                            content_id,
                            ContentStatus::Succeeded,
                        ))
                        .await;
                    }
                    Err(exhausted) => {
                        failure
                            .record(
                                "content.upload",
                                format!(
                                    "upload of {} failed: {}",
                                    content_id, exhausted.last_error
                                ),
                            )
                            .await;
                        bus.publish(DomainEvent::content_status_updated(
                            content_id,
                            ContentStatus::Failed,
                        ))
                        .await;
                    }
                }
            })
            .await;
    }
}

impl std::fmt::Debug for UploadSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSupervisor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::test_bus;
    use crate::bus::{DeliveryMode, EventHandler};
    use crate::event::EventKind;
    use crate::pool::PoolConfig;
    use crate::retry::RetryConfig;
    use herald_core::context::{Principal, Role, TaskContext};
    use herald_core::error::HeraldError;
    use herald_core::store::{FailureStore, InMemoryFailureStore};
    use herald_core::types::UserId;
    use std::time::Duration;

    struct StatusCapture {
        statuses: Arc<parking_lot::Mutex<Vec<ContentStatus>>>,
        notify: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl EventHandler for StatusCapture {
        fn name(&self) -> &str {
            "status-capture"
        }

        async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
            if let DomainEvent::ContentStatusUpdated { status, .. } = event {
                self.statuses.lock().push(*status);
                if *status != ContentStatus::Waiting {
                    self.notify.notify_one();
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        supervisor: UploadSupervisor,
        storage: Arc<InMemoryContentStorage>,
        failures: Arc<InMemoryFailureStore>,
        statuses: Arc<parking_lot::Mutex<Vec<ContentStatus>>>,
        resolved: Arc<tokio::sync::Notify>,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let bus = test_bus();
        let storage = Arc::new(InMemoryContentStorage::new());
        let failures = Arc::new(InMemoryFailureStore::new());
        let statuses = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let resolved = Arc::new(tokio::sync::Notify::new());

        bus.subscribe(
            EventKind::ContentStatusUpdated,
            DeliveryMode::Immediate,
            Arc::new(StatusCapture {
                statuses: Arc::clone(&statuses),
                notify: Arc::clone(&resolved),
            }),
        );

        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        });
        let supervisor = UploadSupervisor::new(
            storage.clone(),
            Arc::new(TaskPool::new("content", PoolConfig::content())),
            retry,
            Arc::new(FailureCapture::new(failures.clone(), Arc::clone(&bus))),
            Arc::clone(&bus),
        );

        Fixture {
            supervisor,
            storage,
            failures,
            statuses,
            resolved,
            bus,
        }
    }

    async fn wait(resolved: &tokio::sync::Notify) {
        tokio::time::timeout(Duration::from_secs(1), resolved.notified())
            .await
            .expect("upload did not resolve");
    }

    #[tokio::test]
    async fn test_upload_publishes_waiting_then_succeeded() {
        let fx = fixture();
        let content_id = ContentId::generate();

        fx.supervisor.upload(content_id, vec![1, 2, 3]).await;
        wait(&fx.resolved).await;

        assert_eq!(
            *fx.statuses.lock(),
            vec![ContentStatus::Waiting, ContentStatus::Succeeded]
        );
        assert!(fx.storage.contains(content_id));
        assert!(fx.failures.is_empty());
    }

    #[tokio::test]
    async fn test_upload_recovers_within_budget() {
        let fx = fixture();
        fx.storage.fail_times(2);
        let content_id = ContentId::generate();

        fx.supervisor.upload(content_id, vec![7]).await;
        wait(&fx.resolved).await;

        assert_eq!(
            *fx.statuses.lock(),
            vec![ContentStatus::Waiting, ContentStatus::Succeeded]
        );
        assert!(fx.storage.contains(content_id));
        assert!(fx.failures.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_upload_records_failure_with_submitter_identity() {
        struct PrincipalCapture {
            seen: Arc<parking_lot::Mutex<Option<UserId>>>,
        }

        #[async_trait]
        impl EventHandler for PrincipalCapture {
            fn name(&self) -> &str {
                "principal-capture"
            }

            async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
                if let DomainEvent::AsyncTaskFailed { principal, .. } = event {
                    *self.seen.lock() = *principal;
                }
                Ok(())
            }
        }

        let fx = fixture();
        fx.storage.fail_times(u32::MAX);
        let content_id = ContentId::generate();

        let seen = Arc::new(parking_lot::Mutex::new(None));
        fx.bus.subscribe(
            EventKind::AsyncTaskFailed,
            DeliveryMode::Immediate,
            Arc::new(PrincipalCapture {
                seen: Arc::clone(&seen),
            }),
        );

        let uploader = UserId::generate();
        let context = TaskContext::new(
            Principal::new(uploader, Role::User),
            herald_core::types::RequestId::from_string("req-up"),
        );
        context
            .scope(fx.supervisor.upload(content_id, vec![0]))
            .await;
        wait(&fx.resolved).await;

        assert_eq!(
            *fx.statuses.lock(),
            vec![ContentStatus::Waiting, ContentStatus::Failed]
        );
        assert!(!fx.storage.contains(content_id));

        // One durable record carrying the submission-time correlation id,
        // and the re-injected event carries the submitter's identity.
        assert_eq!(fx.failures.len(), 1);
        let records = fx.failures.find_all().await.unwrap();
        assert_eq!(records[0].task_name, "content.upload");
        assert_eq!(records[0].request_id.as_str(), "req-up");
        assert_eq!(*seen.lock(), Some(uploader));
    }
}
