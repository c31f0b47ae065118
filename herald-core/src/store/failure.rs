//! Async task failure storage port.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::{RequestId, Timestamp};

/// Durable record of one exhausted async task.
///
/// Append-only: failures are recorded before any user-facing surfacing so
/// operators can reconstruct them even when the affected user cannot be
/// identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncTaskFailureRecord {
    /// Name of the failed task.
    pub task_name: String,
    /// Correlation id captured when the task was submitted.
    pub request_id: RequestId,
    /// Human-readable failure reason.
    pub failure_reason: String,
    /// Creation time.
    pub created_at: Timestamp,
}

impl AsyncTaskFailureRecord {
    /// Creates a new record stamped with the current time.
    #[must_use]
    pub fn new(
        task_name: impl Into<String>,
        request_id: RequestId,
        failure_reason: impl Into<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            request_id,
            failure_reason: failure_reason.into(),
            created_at: Timestamp::now(),
        }
    }
}

/// Port over the failure record backend.
#[async_trait]
pub trait FailureStore: Send + Sync {
    /// Appends one failure record.
    async fn append(&self, record: AsyncTaskFailureRecord) -> Result<(), StorageError>;

    /// Returns all recorded failures in append order.
    async fn find_all(&self) -> Result<Vec<AsyncTaskFailureRecord>, StorageError>;
}

/// In-memory failure store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryFailureStore {
    records: RwLock<Vec<AsyncTaskFailureRecord>>,
}

impl InMemoryFailureStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no failures are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl FailureStore for InMemoryFailureStore {
    async fn append(&self, record: AsyncTaskFailureRecord) -> Result<(), StorageError> {
        self.records.write().push(record);
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<AsyncTaskFailureRecord>, StorageError> {
        Ok(self.records.read().clone())
    }
}
