//! Per-task serialization under concurrent advances.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{builtin_state, doubler_state, echo_add_input, FlakyDoubler};
use serde_json::json;
use taskrunner_core::config::{LockBackend, LockConfig, RunnerConfig};
use taskrunner_core::models::TaskStatus;
use taskrunner_core::{AppState, AppStateInner, Database};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_advances_commit_each_step_once() {
    let state = builtin_state(RunnerConfig::default());
    let task = state
        .engine
        .create_task("echo_add", echo_add_input())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        let id = task.id.clone();
        handles.push(tokio::spawn(async move { state.engine.advance(&id).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let done = state.engine.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.step_counter, 2);

    let steps = state.engine.list_steps(&task.id).await.unwrap();
    let indices: Vec<i64> = steps.iter().map(|s| s.step_index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(state.engine.list_tool_calls(&task.id).await.unwrap().len(), 2);
    assert_eq!(state.engine.list_snapshots(&task.id).await.unwrap().len(), 2);

    let counters = state.metrics.snapshot();
    assert_eq!(counters.tool_invocations, 2);
    assert_eq!(counters.steps_executed, 2);
    assert_eq!(counters.lock_acquisitions, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_tool_is_invoked_once_under_contention() {
    let tool = FlakyDoubler::new(1);
    let config = RunnerConfig {
        retry: taskrunner_core::config::RetryConfig {
            base_delay_ms: 20,
            max_delay_ms: 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let state = doubler_state(tool.clone(), config);
    let task = state
        .engine
        .create_task("double", json!({"n": 4}))
        .await
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let state = state.clone();
            let id = task.id.clone();
            tokio::spawn(async move { state.engine.advance(&id).await })
        })
        .collect();
    for handle in handles {
        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    // One failure plus one success; no attempt was duplicated.
    assert_eq!(tool.calls(), 2);
    assert_eq!(state.engine.list_steps(&task.id).await.unwrap().len(), 1);
}

fn lease_state(path: &str) -> AppState {
    let config = RunnerConfig {
        lock: LockConfig {
            backend: LockBackend::Lease,
            timeout_secs: 10.0,
            lease_ttl_secs: 30.0,
        },
        ..Default::default()
    };
    Arc::new(AppStateInner::new(Database::open(path).unwrap(), config))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lease_lock_serializes_workers_on_separate_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let path = path.to_str().unwrap();

    // Two workers, each with its own connection to the same file.
    let worker_a = lease_state(path);
    let worker_b = lease_state(path);

    let task = worker_a
        .engine
        .create_task("add_echo", echo_add_input())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let state = if i % 2 == 0 {
            worker_a.clone()
        } else {
            worker_b.clone()
        };
        let id = task.id.clone();
        handles.push(tokio::spawn(async move { state.engine.advance(&id).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let done = worker_b.engine.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.step_counter, 2);
    assert_eq!(worker_b.engine.list_steps(&task.id).await.unwrap().len(), 2);

    let invocations = worker_a.metrics.snapshot().tool_invocations
        + worker_b.metrics.snapshot().tool_invocations;
    assert_eq!(invocations, 2);

    let leases: i64 = worker_a
        .db
        .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM task_leases", [], |r| r.get(0)))
        .unwrap();
    assert_eq!(leases, 0);
}

#[tokio::test]
async fn test_lock_timeout_leaves_task_untouched() {
    let state = lease_state(":memory:");
    let task = state
        .engine
        .create_task("echo_add", echo_add_input())
        .await
        .unwrap();

    // Another worker holds the lease for this task.
    let far_future = chrono::Utc::now().timestamp_millis() + 60_000;
    state
        .db
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_leases (task_id, owner, expires_at) VALUES (?1, 'other', ?2)",
                rusqlite::params![task.id, far_future],
            )
        })
        .unwrap();

    let short = Arc::new(AppStateInner::new(
        state.db.clone(),
        RunnerConfig {
            lock: LockConfig {
                backend: LockBackend::Lease,
                timeout_secs: 0.05,
                lease_ttl_secs: 30.0,
            },
            ..Default::default()
        },
    ));
    let started = std::time::Instant::now();
    let err = short.engine.advance(&task.id).await.unwrap_err();
    assert_eq!(err.kind(), "LOCK_TIMEOUT");
    assert!(started.elapsed() < Duration::from_secs(2));

    let task = short.engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Planned);
    assert_eq!(task.step_counter, 0);
}
