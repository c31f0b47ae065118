//! Notification fan-out service.
//!
//! Persists per-recipient notification records, keeps a per-receiver cache
//! of the notification list, and emits the secondary events that drive
//! cache invalidation and push delivery. Reads and deletes are restricted
//! to the record's receiver; a delete that affects no row is reported as
//! not-found whether the id was wrong or the owner was.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use herald_core::context::Principal;
use herald_core::error::{AuthError, HeraldError, StorageError};
use herald_core::store::{NotificationKind, NotificationRecord, NotificationStore};
use herald_core::types::{NotificationId, UserId};

use crate::bus::{DeliveryMode, EventBus, EventHandler};
use crate::event::{DomainEvent, EventKind};

/// Per-receiver cache of notification lists.
///
/// Reachable only through the service and the evict handler; never an
/// ambient global.
#[derive(Debug, Default)]
pub struct NotificationCache {
    entries: DashMap<UserId, Vec<NotificationRecord>>,
}

impl NotificationCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached list for a receiver, if warm.
    #[must_use]
    pub fn get(&self, receiver_id: UserId) -> Option<Vec<NotificationRecord>> {
        self.entries.get(&receiver_id).map(|e| e.clone())
    }

    /// Caches a receiver's list. Empty lists are not cached.
    pub fn put(&self, receiver_id: UserId, records: &[NotificationRecord]) {
        if !records.is_empty() {
            self.entries.insert(receiver_id, records.to_vec());
        }
    }

    /// Drops a receiver's cached list.
    pub fn evict(&self, receiver_id: UserId) {
        self.entries.remove(&receiver_id);
    }

    /// Returns the number of cached receivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Notification fan-out service.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    cache: Arc<NotificationCache>,
    bus: Arc<EventBus>,
}

impl NotificationService {
    /// Creates a service over the given store and bus.
    #[must_use]
    pub fn new(store: Arc<dyn NotificationStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            cache: Arc::new(NotificationCache::new()),
            bus,
        }
    }

    /// Returns the service's cache (shared with the evict handler).
    #[must_use]
    pub fn cache(&self) -> Arc<NotificationCache> {
        Arc::clone(&self.cache)
    }

    /// Persists one record and publishes `NotificationCreated` after commit.
    ///
    /// The receiver's cached list is invalidated.
    pub async fn create(
        &self,
        receiver_id: UserId,
        title: impl Into<String>,
        content: impl Into<String>,
        kind: NotificationKind,
        target_id: Option<Uuid>,
    ) -> Result<NotificationRecord, HeraldError> {
        let record = NotificationRecord::new(receiver_id, title, content, kind, target_id);
        debug!(receiver = %receiver_id, kind = %kind, "Creating notification");

        let mut uow = self.bus.begin();
        self.store.insert(record.clone()).await?;
        uow.publish(DomainEvent::notification_created(record.clone()))
            .await;
        uow.commit().await;

        self.cache.evict(receiver_id);
        info!(id = %record.id, receiver = %receiver_id, "Notification created");
        Ok(record)
    }

    /// Persists one record per distinct receiver in one batch, then
    /// publishes a single `MultipleNotificationCreated` whose receiver set
    /// equals the input set.
    pub async fn create_all(
        &self,
        receiver_ids: &[UserId],
        title: impl Into<String>,
        content: impl Into<String>,
        kind: NotificationKind,
        target_id: Option<Uuid>,
    ) -> Result<Vec<NotificationRecord>, HeraldError> {
        let title = title.into();
        let content = content.into();

        let mut seen = HashSet::new();
        let records: Vec<NotificationRecord> = receiver_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|id| {
                NotificationRecord::new(*id, title.clone(), content.clone(), kind, target_id)
            })
            .collect();

        debug!(receivers = records.len(), kind = %kind, "Creating notification batch");

        let mut uow = self.bus.begin();
        self.store.insert_all(records.clone()).await?;
        uow.publish(DomainEvent::multiple_notifications_created(records.clone()))
            .await;
        uow.commit().await;

        info!(receivers = records.len(), kind = %kind, "Notification batch created");
        Ok(records)
    }

    /// Returns the caller's notifications, newest first.
    ///
    /// Denied unless the caller is the receiver. Served from the cache when
    /// warm.
    pub async fn find_all_by_receiver(
        &self,
        principal: &Principal,
        receiver_id: UserId,
    ) -> Result<Vec<NotificationRecord>, HeraldError> {
        if principal.user_id != receiver_id {
            return Err(AuthError::Denied {
                action: "notification.read".to_string(),
            }
            .into());
        }

        if let Some(cached) = self.cache.get(receiver_id) {
            debug!(receiver = %receiver_id, count = cached.len(), "Notification list served from cache");
            return Ok(cached);
        }

        let records = self.store.find_by_receiver(receiver_id).await?;
        self.cache.put(receiver_id, &records);
        debug!(receiver = %receiver_id, count = records.len(), "Notification list loaded");
        Ok(records)
    }

    /// Deletes one of the caller's notifications.
    ///
    /// Denied unless the caller is the receiver. A delete that affects no
    /// row - wrong owner or nonexistent id - is reported as not-found.
    pub async fn delete(
        &self,
        principal: &Principal,
        notification_id: NotificationId,
        receiver_id: UserId,
    ) -> Result<(), HeraldError> {
        if principal.user_id != receiver_id {
            return Err(AuthError::Denied {
                action: "notification.delete".to_string(),
            }
            .into());
        }

        let affected = self.store.delete_owned(notification_id, receiver_id).await?;
        if !affected {
            return Err(StorageError::NotFound {
                entity: "notification".to_string(),
                id: notification_id.to_string(),
            }
            .into());
        }

        self.cache.evict(receiver_id);
        info!(id = %notification_id, receiver = %receiver_id, "Notification deleted");
        Ok(())
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("cached_receivers", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Evicts cached notification lists when a batch lands.
///
/// Local cache-invalidation signal: rides the bus directly, never the
/// relay.
pub struct CacheEvictHandler {
    cache: Arc<NotificationCache>,
}

impl CacheEvictHandler {
    /// Registers the handler (after-commit) for batch notification events.
    pub fn register(bus: &EventBus, cache: Arc<NotificationCache>) {
        bus.subscribe(
            EventKind::MultipleNotificationCreated,
            DeliveryMode::AfterCommit,
            Arc::new(Self { cache }),
        );
    }
}

#[async_trait]
impl EventHandler for CacheEvictHandler {
    fn name(&self) -> &str {
        "notification-cache-evict"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
        let receivers = event.receiver_ids();
        for receiver_id in &receivers {
            self.cache.evict(*receiver_id);
        }
        debug!(receivers = receivers.len(), "Notification cache evicted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::{CountingHandler, test_bus};
    use herald_core::context::Role;
    use herald_core::store::InMemoryNotificationStore;
    use std::time::Duration;

    fn service_with(
        store: Arc<InMemoryNotificationStore>,
    ) -> (NotificationService, Arc<EventBus>) {
        let bus = test_bus();
        (NotificationService::new(store, Arc::clone(&bus)), bus)
    }

    fn owner(receiver: UserId) -> Principal {
        Principal::new(receiver, Role::User)
    }

    #[tokio::test]
    async fn test_create_persists_and_publishes() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, bus) = service_with(store.clone());
        let handler = CountingHandler::new("push");
        bus.subscribe(
            EventKind::NotificationCreated,
            DeliveryMode::AfterCommit,
            handler.clone(),
        );

        let receiver = UserId::generate();
        let record = service
            .create(receiver, "title", "content", NotificationKind::RoleChanged, None)
            .await
            .unwrap();

        assert_eq!(record.receiver_id, receiver);
        assert_eq!(store.len(), 1);
        handler.wait().await;
        assert_eq!(handler.count(), 1);
    }

    #[tokio::test]
    async fn test_create_all_dedupes_and_publishes_once() {
        struct ReceiverCapture {
            receivers: Arc<parking_lot::Mutex<Vec<HashSet<UserId>>>>,
        }

        #[async_trait]
        impl EventHandler for ReceiverCapture {
            fn name(&self) -> &str {
                "receiver-capture"
            }

            async fn handle(&self, event: &DomainEvent) -> Result<(), HeraldError> {
                self.receivers.lock().push(event.receiver_ids());
                Ok(())
            }
        }

        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, bus) = service_with(store.clone());
        let captured = Arc::new(parking_lot::Mutex::new(Vec::new()));
        bus.subscribe(
            EventKind::MultipleNotificationCreated,
            DeliveryMode::AfterCommit,
            Arc::new(ReceiverCapture {
                receivers: Arc::clone(&captured),
            }),
        );

        let a = UserId::generate();
        let b = UserId::generate();
        let records = service
            .create_all(&[a, b, a], "t", "c", NotificationKind::NewMessage, None)
            .await
            .unwrap();

        // One record per distinct receiver.
        assert_eq!(records.len(), 2);
        assert_eq!(store.len(), 2);

        // Exactly one secondary event carrying exactly {a, b}.
        tokio::time::timeout(Duration::from_secs(1), async {
            while captured.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let captured = captured.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0], [a, b].into_iter().collect());
    }

    #[tokio::test]
    async fn test_find_requires_matching_principal() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, _bus) = service_with(store);
        let receiver = UserId::generate();

        let result = service
            .find_all_by_receiver(&owner(UserId::generate()), receiver)
            .await;
        assert!(matches!(
            result,
            Err(HeraldError::Auth(AuthError::Denied { .. }))
        ));
    }

    #[tokio::test]
    async fn test_find_newest_first_and_cached() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, _bus) = service_with(store.clone());
        let receiver = UserId::generate();

        service
            .create(receiver, "old", "c", NotificationKind::NewMessage, None)
            .await
            .unwrap();
        service
            .create(receiver, "new", "c", NotificationKind::NewMessage, None)
            .await
            .unwrap();

        let first = service
            .find_all_by_receiver(&owner(receiver), receiver)
            .await
            .unwrap();
        assert_eq!(first[0].title, "new");
        assert_eq!(first[1].title, "old");

        // Bypass the service; the cached list must still be served.
        store
            .insert(NotificationRecord::new(
                receiver,
                "sneaky",
                "c",
                NotificationKind::NewMessage,
                None,
            ))
            .await
            .unwrap();
        let cached = service
            .find_all_by_receiver(&owner(receiver), receiver)
            .await
            .unwrap();
        assert_eq!(cached.len(), 2);

        service.cache().evict(receiver);
        let fresh = service
            .find_all_by_receiver(&owner(receiver), receiver)
            .await
            .unwrap();
        assert_eq!(fresh.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_owned_and_not_found() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, _bus) = service_with(store.clone());
        let receiver = UserId::generate();

        let record = service
            .create(receiver, "t", "c", NotificationKind::NewMessage, None)
            .await
            .unwrap();

        // Nonexistent id and wrong owner both come back as not-found.
        let missing = service
            .delete(&owner(receiver), NotificationId::generate(), receiver)
            .await;
        assert!(matches!(
            missing,
            Err(HeraldError::Storage(StorageError::NotFound { .. }))
        ));

        service
            .delete(&owner(receiver), record.id, receiver)
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_matching_principal() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, _bus) = service_with(store);
        let receiver = UserId::generate();

        let result = service
            .delete(&owner(UserId::generate()), NotificationId::generate(), receiver)
            .await;
        assert!(matches!(
            result,
            Err(HeraldError::Auth(AuthError::Denied { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cache_evict_handler() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (service, bus) = service_with(store);
        let cache = service.cache();
        CacheEvictHandler::register(&bus, Arc::clone(&cache));

        let receiver = UserId::generate();
        service
            .create(receiver, "t", "c", NotificationKind::NewMessage, None)
            .await
            .unwrap();
        service
            .find_all_by_receiver(&owner(receiver), receiver)
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        service
            .create_all(&[receiver], "t2", "c2", NotificationKind::NewMessage, None)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !cache.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
