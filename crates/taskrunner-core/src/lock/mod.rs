//! Per-task mutual exclusion.
//!
//! At most one `advance` may run for a given task at a time, across every
//! worker sharing the database. [`TaskLock`] abstracts the mechanism:
//!
//! - [`LocalTaskLock`]: per-task async mutex, for a single process.
//! - [`LeaseTaskLock`]: lease rows in the shared SQLite file, for several
//!   processes. Leases expire, so a crashed holder cannot block a task
//!   forever.
//!
//! A [`TaskLockGuard`] releases the lock when dropped, on every exit path.

mod lease;
mod local;

pub use lease::LeaseTaskLock;
pub use local::LocalTaskLock;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{LockBackend, LockConfig};
use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::metrics::Metrics;

/// Held lock on one task. Dropping it releases the lock.
///
/// Releasing may touch the database, so [`TaskLockGuard::release`] runs it
/// on the blocking pool. A guard dropped without `release` (a cancelled or
/// panicking advance) hands the release to the blocking pool when a runtime
/// is available and runs it inline otherwise.
pub struct TaskLockGuard {
    task_id: String,
    release: Option<Box<dyn Send>>,
}

impl TaskLockGuard {
    pub(crate) fn new(task_id: &str, release: impl Send + 'static) -> Self {
        Self {
            task_id: task_id.to_string(),
            release: Some(Box::new(release)),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Release the lock and wait until the release has taken effect.
    pub async fn release(mut self) {
        if let Some(release) = self.release.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || drop(release)).await {
                tracing::warn!(task_id = %self.task_id, "task lock release failed: {}", e);
            }
        }
    }
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || drop(release));
                }
                Err(_) => drop(release),
            }
        }
    }
}

impl std::fmt::Debug for TaskLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLockGuard")
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[async_trait]
pub trait TaskLock: Send + Sync {
    /// Wait up to `timeout` for exclusive access to `task_id`.
    async fn acquire(&self, task_id: &str, timeout: Duration)
        -> Result<TaskLockGuard, TaskRunnerError>;
}

/// Build the configured lock backend.
pub fn from_config(config: &LockConfig, db: &Database) -> Arc<dyn TaskLock> {
    match config.backend {
        LockBackend::Local => Arc::new(LocalTaskLock::new()),
        LockBackend::Lease => Arc::new(LeaseTaskLock::new(db.clone(), config.lease_ttl())),
    }
}

/// Runs work while holding a task's lock and records how long it waited.
pub struct TaskController {
    lock: Arc<dyn TaskLock>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl TaskController {
    pub fn new(lock: Arc<dyn TaskLock>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            lock,
            timeout,
            metrics,
        }
    }

    pub async fn with_task_lock<F, T>(&self, task_id: &str, body: F) -> Result<T, TaskRunnerError>
    where
        F: Future<Output = Result<T, TaskRunnerError>>,
    {
        let started = Instant::now();
        let guard = self.lock.acquire(task_id, self.timeout).await?;
        let waited = started.elapsed();
        self.metrics.lock_acquired(waited);
        tracing::debug!(task_id = %guard.task_id(), waited_us = waited.as_micros() as u64, "task lock acquired");

        let result = body.await;
        guard.release().await;
        result
    }
}
