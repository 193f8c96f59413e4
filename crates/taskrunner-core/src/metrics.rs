//! In-process counters for the execution core.
//!
//! Counters are plain atomics; adapters read them through
//! [`Metrics::snapshot`] and decide how to render them.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    tasks_created: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    steps_executed: AtomicU64,
    tool_invocations: AtomicU64,
    tool_retries: AtomicU64,
    tool_reuses: AtomicU64,
    policy_rejections: AtomicU64,
    lock_acquisitions: AtomicU64,
    lock_wait_micros_total: AtomicU64,
    lock_wait_micros_max: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub steps_executed: u64,
    pub tool_invocations: u64,
    pub tool_retries: u64,
    pub tool_reuses: u64,
    pub policy_rejections: u64,
    pub lock_acquisitions: u64,
    pub lock_wait_micros_total: u64,
    pub lock_wait_micros_max: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn step_executed(&self) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_invoked(&self) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_retried(&self) {
        self.tool_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_reused(&self) {
        self.tool_reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn policy_rejected(&self) {
        self.policy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_acquired(&self, waited: Duration) {
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.lock_wait_micros_total
            .fetch_add(micros, Ordering::Relaxed);
        self.lock_wait_micros_max.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            steps_executed: self.steps_executed.load(Ordering::Relaxed),
            tool_invocations: self.tool_invocations.load(Ordering::Relaxed),
            tool_retries: self.tool_retries.load(Ordering::Relaxed),
            tool_reuses: self.tool_reuses.load(Ordering::Relaxed),
            policy_rejections: self.policy_rejections.load(Ordering::Relaxed),
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            lock_wait_micros_total: self.lock_wait_micros_total.load(Ordering::Relaxed),
            lock_wait_micros_max: self.lock_wait_micros_max.load(Ordering::Relaxed),
        }
    }
}
