use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{TaskLock, TaskLockGuard};
use crate::error::TaskRunnerError;

/// Per-task `tokio::sync::Mutex`, FIFO-fair among waiters in this process.
#[derive(Default)]
pub struct LocalTaskLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalTaskLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, task_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, TaskRunnerError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| TaskRunnerError::PersistenceFailure(format!("Lock poisoned: {}", e)))?;
        // Drop entries nobody holds or waits on.
        locks.retain(|id, m| id == task_id || Arc::strong_count(m) > 1);
        Ok(locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }
}

#[async_trait]
impl TaskLock for LocalTaskLock {
    async fn acquire(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<TaskLockGuard, TaskRunnerError> {
        let mutex = self.entry(task_id)?;
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(TaskLockGuard::new(task_id, guard)),
            Err(_) => Err(TaskRunnerError::LockTimeout(format!(
                "task {} is locked by another worker (waited {:?})",
                task_id, timeout
            ))),
        }
    }
}
