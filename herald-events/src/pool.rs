//! Context-propagating task pools.
//!
//! Bounded worker pools for the pipeline's async side effects. Submission
//! captures the ambient [`TaskContext`] and re-installs it inside the
//! worker, so identity and correlation id survive the task boundary. The
//! queue has a hard capacity: once it is full the submitted task runs on
//! the caller itself - backpressure, never a silent drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use herald_core::context::TaskContext;

/// Configuration of one task pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Hard capacity of the submission queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl PoolConfig {
    /// Default sizing for the content pool (network-bound side effects).
    #[must_use]
    pub const fn content() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
        }
    }

    /// Default sizing for the event pool (fan-out and notification work).
    #[must_use]
    pub const fn event() -> Self {
        Self {
            workers: 2,
            queue_capacity: 100,
        }
    }
}

/// Configuration of the pipeline's two standard pools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Pool for short network-bound side effects (uploads).
    #[serde(default = "PoolConfig::content")]
    pub content: PoolConfig,
    /// Pool for event fan-out and notification work.
    #[serde(default = "PoolConfig::event")]
    pub event: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            content: PoolConfig::content(),
            event: PoolConfig::event(),
        }
    }
}

type Job = (TaskContext, BoxFuture<'static, ()>);

/// A bounded worker pool carrying ambient context across the task boundary.
pub struct TaskPool {
    name: String,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    submitted: AtomicU64,
    ran_inline: AtomicU64,
}

impl TaskPool {
    /// Creates a pool and spawns its workers.
    #[must_use]
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(config.workers.max(1));
        for _ in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some((context, future)) => context.scope(future).await,
                        None => break,
                    }
                }
            }));
        }

        info!(pool = %name, workers = config.workers, capacity = config.queue_capacity, "Task pool started");

        Self {
            name,
            sender: RwLock::new(Some(tx)),
            workers: tokio::sync::Mutex::new(handles),
            submitted: AtomicU64::new(0),
            ran_inline: AtomicU64::new(0),
        }
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the total number of submissions.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Returns how many submissions ran on the caller (backpressure).
    #[must_use]
    pub fn ran_inline(&self) -> u64 {
        self.ran_inline.load(Ordering::Relaxed)
    }

    /// Submits a task, capturing the caller's ambient context.
    ///
    /// The context is re-installed inside the worker for the task's
    /// duration and released on every exit path. With a full queue or a
    /// shut-down pool the task runs on the caller instead.
    pub async fn submit<F>(&self, task_name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let context = TaskContext::current();
        self.submitted.fetch_add(1, Ordering::Relaxed);

        let job: Job = (context, Box::pin(future));
        let sender = self.sender.read().clone();
        let job = match sender {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(job)) => {
                    debug!(pool = %self.name, task = task_name, "Queue full, running on caller");
                    job
                }
                Err(TrySendError::Closed(job)) => {
                    debug!(pool = %self.name, task = task_name, "Pool closed, running on caller");
                    job
                }
            },
            None => job,
        };

        self.ran_inline.fetch_add(1, Ordering::Relaxed);
        let (context, future) = job;
        context.scope(future).await;
    }

    /// Closes the queue and waits for the workers to drain it.
    ///
    /// Submissions after shutdown run on the caller.
    pub async fn shutdown(&self) {
        self.sender.write().take();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        info!(pool = %self.name, "Task pool shut down");
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("submitted", &self.submitted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::context::{Principal, Role};
    use herald_core::types::{RequestId, UserId};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_submit_runs_on_worker() {
        let pool = TaskPool::new("test", PoolConfig::default());
        let done = Arc::new(Notify::new());
        let signal = Arc::clone(&done);

        pool.submit("job", async move {
            signal.notify_one();
        })
        .await;

        tokio::time::timeout(Duration::from_secs(1), done.notified())
            .await
            .unwrap();
        assert_eq!(pool.submitted(), 1);
        assert_eq!(pool.ran_inline(), 0);
    }

    #[tokio::test]
    async fn test_submit_propagates_context() {
        let pool = Arc::new(TaskPool::new("test", PoolConfig::default()));
        let principal = Principal::new(UserId::generate(), Role::Admin);
        let context = TaskContext::new(principal, RequestId::from_string("req-7"));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let pool_ref = Arc::clone(&pool);
        context
            .scope(async move {
                pool_ref
                    .submit("job", async move {
                        let _ = tx.send(TaskContext::current());
                    })
                    .await;
            })
            .await;

        let seen = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.principal(), Some(&principal));
        assert_eq!(seen.request_id().unwrap().as_str(), "req-7");
    }

    #[tokio::test]
    async fn test_overflow_runs_on_caller() {
        let pool = TaskPool::new(
            "tiny",
            PoolConfig {
                workers: 1,
                queue_capacity: 1,
            },
        );

        // Occupy the single worker until released.
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (started_tx, release_rx) = (Arc::clone(&started), Arc::clone(&release));
        pool.submit("blocker", async move {
            started_tx.notify_one();
            release_rx.notified().await;
        })
        .await;
        started.notified().await;

        // Fill the queue.
        pool.submit("queued", async {}).await;
        assert_eq!(pool.ran_inline(), 0);

        // This one must run on the caller - observable synchronously.
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        pool.submit("overflow", async move {
            flag.fetch_add(1, Ordering::Relaxed);
        })
        .await;

        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert_eq!(pool.ran_inline(), 1);
        release.notify_one();
    }

    #[tokio::test]
    async fn test_overflow_preserves_context_inline() {
        let pool = Arc::new(TaskPool::new(
            "tiny",
            PoolConfig {
                workers: 1,
                queue_capacity: 1,
            },
        ));

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (started_tx, release_rx) = (Arc::clone(&started), Arc::clone(&release));
        pool.submit("blocker", async move {
            started_tx.notify_one();
            release_rx.notified().await;
        })
        .await;
        started.notified().await;
        pool.submit("queued", async {}).await;

        let principal = Principal::new(UserId::generate(), Role::User);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let pool_ref = Arc::clone(&pool);
        TaskContext::empty()
            .with_principal(principal)
            .scope(async move {
                pool_ref
                    .submit("overflow", async move {
                        *slot.lock() = TaskContext::current().principal().copied();
                    })
                    .await;
            })
            .await;

        assert_eq!(*seen.lock(), Some(principal));
        release.notify_one();
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_runs_inline() {
        let pool = TaskPool::new("test", PoolConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit("job", async move {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .await;
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::Relaxed), 5);

        let counter_ref = Arc::clone(&counter);
        pool.submit("late", async move {
            counter_ref.fetch_add(1, Ordering::Relaxed);
        })
        .await;
        assert_eq!(counter.load(Ordering::Relaxed), 6);
        assert_eq!(pool.ran_inline(), 1);
    }

    #[test]
    fn test_pools_config_defaults() {
        let config = PoolsConfig::default();
        assert_eq!(config.content.workers, 10);
        assert_eq!(config.event.workers, 2);
        assert_eq!(config.event.queue_capacity, 100);
    }
}
