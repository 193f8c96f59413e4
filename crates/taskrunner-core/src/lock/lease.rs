use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};

use super::{TaskLock, TaskLockGuard};
use crate::db::Database;
use crate::error::TaskRunnerError;

const MIN_POLL: Duration = Duration::from_millis(5);
const MAX_POLL: Duration = Duration::from_millis(100);

/// Cross-process task lock backed by the `task_leases` table.
///
/// A lease is taken by inserting a row for the task, or by overwriting a
/// row whose `expires_at` has passed. Every acquire uses a fresh owner token
/// so a release can never delete someone else's lease.
pub struct LeaseTaskLock {
    db: Database,
    ttl: Duration,
}

impl LeaseTaskLock {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    async fn try_take(&self, task_id: &str, owner: &str) -> Result<bool, TaskRunnerError> {
        let task_id = task_id.to_string();
        let owner = owner.to_string();
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        self.db
            .with_conn_async(move |conn| {
                let now = Utc::now().timestamp_millis();
                let changed = conn.execute(
                    "INSERT INTO task_leases (task_id, owner, expires_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(task_id) DO UPDATE SET
                       owner = excluded.owner,
                       expires_at = excluded.expires_at
                     WHERE task_leases.expires_at <= ?4",
                    rusqlite::params![task_id, owner, now.saturating_add(ttl_ms), now],
                )?;
                Ok(changed == 1)
            })
            .await
    }
}

/// Deletes the owned lease row when dropped. The delete blocks, so
/// [`TaskLockGuard`] drops this on the blocking pool.
struct LeaseRelease {
    db: Database,
    task_id: String,
    owner: String,
}

impl Drop for LeaseRelease {
    fn drop(&mut self) {
        let result = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM task_leases WHERE task_id = ?1 AND owner = ?2",
                rusqlite::params![self.task_id, self.owner],
            )
        });
        if let Err(e) = result {
            // The lease expires on its own.
            tracing::warn!(task_id = %self.task_id, "failed to release task lease: {}", e);
        }
    }
}

#[async_trait]
impl TaskLock for LeaseTaskLock {
    async fn acquire(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<TaskLockGuard, TaskRunnerError> {
        let owner = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut poll = MIN_POLL;

        loop {
            if self.try_take(task_id, &owner).await? {
                return Ok(TaskLockGuard::new(
                    task_id,
                    LeaseRelease {
                        db: self.db.clone(),
                        task_id: task_id.to_string(),
                        owner,
                    },
                ));
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(TaskRunnerError::LockTimeout(format!(
                    "task {} is leased by another worker (waited {:?})",
                    task_id, timeout
                )));
            }
            tokio::time::sleep(poll.min(remaining)).await;
            poll = (poll * 2).min(MAX_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn lease_count(db: &Database) -> i64 {
        db.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM task_leases", [], |r| r.get(0)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_and_released_on_drop() {
        let db = Database::open_in_memory().unwrap();
        let lock = LeaseTaskLock::new(db.clone(), Duration::from_secs(30));

        let guard = lock.acquire("t1", Duration::from_millis(50)).await.unwrap();
        assert_eq!(lease_count(&db), 1);

        let err = lock.acquire("t1", Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.kind(), "LOCK_TIMEOUT");

        guard.release().await;
        assert_eq!(lease_count(&db), 0);
        lock.acquire("t1", Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let db = Database::open_in_memory().unwrap();
        let short = LeaseTaskLock::new(db.clone(), Duration::from_millis(10));
        let stale = short.acquire("t1", Duration::from_millis(50)).await.unwrap();
        // Simulate a crashed holder: never released.
        std::mem::forget(stale);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let lock = LeaseTaskLock::new(db.clone(), Duration::from_secs(30));
        lock.acquire("t1", Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let db = Database::open_in_memory().unwrap();
        let lock = Arc::new(LeaseTaskLock::new(db, Duration::from_secs(30)));
        let guard = lock.acquire("t1", Duration::from_millis(50)).await.unwrap();

        let contender = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("t1", Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);
        assert!(contender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_off_the_async_thread() {
        let db = Database::open_in_memory().unwrap();
        let lock = LeaseTaskLock::new(db.clone(), Duration::from_secs(30));
        let guard = lock.acquire("t1", Duration::from_millis(50)).await.unwrap();
        drop(guard);

        for _ in 0..100 {
            if lease_count(&db) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lease row was never deleted");
    }
}
