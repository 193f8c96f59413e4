//! Step engine: the task state machine.
//!
//! `PLANNED → RUNNING → {COMPLETED | FAILED}`. One call to
//! [`StepEngine::advance`] executes exactly one flow node under the task
//! lock and commits the task row, the step row and the state snapshot in a
//! single transaction. The step commit is guarded by a compare-and-set on
//! `step_counter`, so a worker that somehow raced past the lock cannot
//! commit a second step for the same index.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::RunnerConfig;
use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::executor::{IdempotentExecutor, RetryPolicy};
use crate::flows::{FlowGraph, FlowRegistry, NextNode};
use crate::lock::{self, TaskController, TaskLock};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{
    AuditEntry, GraphStateSnapshot, Step, StepStatus, Task, TaskStatus, ToolCall, ViolationKind,
};
use crate::policy::{PolicyEngine, PolicyViolation};
use crate::store::{
    audit_store, snapshot_store, step_store, task_store, AuditStore, SnapshotStore, StepStore,
    TaskStore, ToolCallStore,
};
use crate::tools::ToolRegistry;
use crate::trace::{new_span_id, new_trace_id};

/// Counters plus row counts grouped by status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub counters: MetricsSnapshot,
    pub tasks_by_status: BTreeMap<String, i64>,
    pub tool_calls_by_status: BTreeMap<String, i64>,
}

pub struct StepEngine {
    db: Database,
    flows: Arc<FlowRegistry>,
    policy: PolicyEngine,
    executor: IdempotentExecutor,
    controller: TaskController,
    metrics: Arc<Metrics>,
    task_store: TaskStore,
    step_store: StepStore,
    tool_call_store: ToolCallStore,
    snapshot_store: SnapshotStore,
    audit_store: AuditStore,
}

impl StepEngine {
    /// Engine using the lock backend named in `config`.
    pub fn new(
        db: Database,
        config: &RunnerConfig,
        tools: Arc<ToolRegistry>,
        flows: Arc<FlowRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let lock = lock::from_config(&config.lock, &db);
        Self::with_lock(db, config, tools, flows, metrics, lock)
    }

    pub fn with_lock(
        db: Database,
        config: &RunnerConfig,
        tools: Arc<ToolRegistry>,
        flows: Arc<FlowRegistry>,
        metrics: Arc<Metrics>,
        lock: Arc<dyn TaskLock>,
    ) -> Self {
        let policy = PolicyEngine::new(&config.policy, tools.clone());
        let executor = IdempotentExecutor::new(
            db.clone(),
            tools,
            RetryPolicy::from(&config.retry),
            config.policy.tool_timeout(),
            metrics.clone(),
        );
        let controller = TaskController::new(lock, config.lock.timeout(), metrics.clone());
        Self {
            task_store: TaskStore::new(db.clone()),
            step_store: StepStore::new(db.clone()),
            tool_call_store: ToolCallStore::new(db.clone()),
            snapshot_store: SnapshotStore::new(db.clone()),
            audit_store: AuditStore::new(db.clone()),
            db,
            flows,
            policy,
            executor,
            controller,
            metrics,
        }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    // ── Create ─────────────────────────────────────────────────────────

    /// Create a PLANNED task positioned at the flow's entry node.
    pub async fn create_task(&self, flow_name: &str, input: Value) -> Result<Task, TaskRunnerError> {
        let flow = match self.flows.lookup(flow_name) {
            Ok(flow) => flow,
            Err(err) => {
                let violation = PolicyViolation::new(ViolationKind::UnknownFlow, err.to_string());
                let payload = json!({ "flowName": flow_name, "input": input });
                return Err(self.reject(violation, None, None, None, &payload).await);
            }
        };

        if let Err(violation) = self.policy.check_initial_input(&input) {
            let payload = json!({ "flowName": flow_name, "input": input });
            return Err(self.reject(violation, None, None, None, &payload).await);
        }

        let state = match input {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        let task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            flow.name.clone(),
            flow.entry.clone(),
            state,
            new_trace_id(),
        );
        self.task_store.save(&task).await?;
        self.metrics.task_created();

        tracing::info!(
            task_id = %task.id,
            trace_id = %task.trace_id,
            flow = %task.flow_name,
            "task created"
        );
        Ok(task)
    }

    // ── Advance ────────────────────────────────────────────────────────

    /// Execute one node of the task. A terminal task is returned unchanged.
    pub async fn advance(&self, task_id: &str) -> Result<Task, TaskRunnerError> {
        self.controller
            .with_task_lock(task_id, self.advance_locked(task_id))
            .await
    }

    /// Advance until the task is terminal or `max_steps` advances have run.
    pub async fn run(&self, task_id: &str, max_steps: usize) -> Result<Task, TaskRunnerError> {
        let mut task = self.get_task(task_id).await?;
        for _ in 0..max_steps {
            if task.status.is_terminal() {
                break;
            }
            task = self.advance(task_id).await?;
        }
        Ok(task)
    }

    async fn advance_locked(&self, task_id: &str) -> Result<Task, TaskRunnerError> {
        let task = self.get_task(task_id).await?;
        if task.status.is_terminal() {
            tracing::debug!(task_id = %task.id, status = task.status.as_str(), "advance on terminal task");
            return Ok(task);
        }

        let span = tracing::info_span!(
            "advance",
            task_id = %task.id,
            trace_id = %task.trace_id,
            step_index = task.step_counter,
        );
        self.execute_step(task).instrument(span).await
    }

    async fn execute_step(&self, task: Task) -> Result<Task, TaskRunnerError> {
        let flow = self.flows.lookup(&task.flow_name)?;
        let node_id = task.next_node.clone().unwrap_or_else(|| task.current_node.clone());
        let node = flow.node(&node_id).ok_or_else(|| {
            TaskRunnerError::UnknownFlow(format!(
                "flow '{}' has no node '{}'",
                flow.name, node_id
            ))
        })?;
        let step_index = task.step_counter;
        let tool_input = node.input.resolve(&task.state);

        if let Err(violation) = self.policy.check(&node.tool, &tool_input, &task) {
            if violation.kind.is_terminal() {
                return Err(self.fail_on_violation(task, violation, &node.tool, &tool_input).await);
            }
            return Err(self
                .reject(
                    violation,
                    Some(&task.id),
                    Some(step_index),
                    Some(&node.tool),
                    &tool_input,
                )
                .await);
        }

        let outcome = match self
            .executor
            .execute(&task.id, step_index, &node.tool, &tool_input)
            .await
        {
            Ok(outcome) => outcome,
            Err(TaskRunnerError::ToolExecutionFailed(detail)) => {
                self.mark_failed(task, &node_id).await?;
                return Err(TaskRunnerError::ToolExecutionFailed(detail));
            }
            Err(other) => return Err(other),
        };

        let expected = task.step_counter;
        let mut next = task;
        next.state.insert(node.output_key.clone(), outcome.output.clone());
        next.step_counter += 1;
        next.updated_at = Utc::now();
        let step_status = match node.next_node(&outcome.output) {
            NextNode::Node(successor) => {
                if flow.node(&successor).is_none() {
                    return Err(TaskRunnerError::UnknownFlow(format!(
                        "flow '{}' has no node '{}'",
                        flow.name, successor
                    )));
                }
                next.status = TaskStatus::Running;
                next.current_node = successor.clone();
                next.next_node = Some(successor);
                StepStatus::Completed
            }
            NextNode::Complete => {
                next.status = TaskStatus::Completed;
                next.current_node = node_id.clone();
                next.next_node = None;
                StepStatus::Completed
            }
            NextNode::Fail => {
                next.status = TaskStatus::Failed;
                next.current_node = node_id.clone();
                next.next_node = None;
                StepStatus::Failed
            }
        };

        let step = Step {
            task_id: next.id.clone(),
            step_index,
            node_id: node_id.clone(),
            tool_name: node.tool.clone(),
            span_id: new_span_id(),
            status: step_status,
            created_at: next.updated_at,
        };
        let snapshot = GraphStateSnapshot {
            task_id: next.id.clone(),
            step_index,
            current_node: next.current_node.clone(),
            next_node: next.next_node.clone(),
            state: next.state.clone(),
            created_at: next.updated_at,
        };

        let committed = next.clone();
        self.db
            .with_tx_async(move |tx| {
                let updated = task_store::update_progress(tx, &committed, expected)?;
                if updated != 1 {
                    return Err(TaskRunnerError::PersistenceFailure(format!(
                        "task {} moved past step {} concurrently",
                        committed.id, expected
                    )));
                }
                step_store::insert(tx, &step)?;
                snapshot_store::insert(tx, &snapshot)?;
                Ok(())
            })
            .await?;

        self.metrics.step_executed();
        match next.status {
            TaskStatus::Completed => self.metrics.task_completed(),
            TaskStatus::Failed => self.metrics.task_failed(),
            _ => {}
        }
        tracing::info!(
            node = %node_id,
            tool = %node.tool,
            reused = outcome.reused,
            retry_count = outcome.retry_count,
            status = next.status.as_str(),
            "step committed"
        );
        Ok(next)
    }

    /// Record one audit entry for a non-terminal rejection and return the error.
    async fn reject(
        &self,
        violation: PolicyViolation,
        task_id: Option<&str>,
        step_index: Option<i64>,
        tool_name: Option<&str>,
        payload: &Value,
    ) -> TaskRunnerError {
        self.metrics.policy_rejected();
        let entry = violation.audit_entry(task_id, step_index, tool_name, payload);
        tracing::warn!(
            task_id = task_id.unwrap_or("-"),
            violation = violation.kind.as_str(),
            detail = %violation.detail,
            "policy rejected invocation"
        );
        if let Err(e) = self.audit_store.record(&entry).await {
            return e;
        }
        violation.into()
    }

    /// Audit entry and FAILED status, committed together.
    async fn fail_on_violation(
        &self,
        task: Task,
        violation: PolicyViolation,
        tool_name: &str,
        payload: &Value,
    ) -> TaskRunnerError {
        self.metrics.policy_rejected();
        let entry = violation.audit_entry(Some(&task.id), Some(task.step_counter), Some(tool_name), payload);
        tracing::warn!(
            violation = violation.kind.as_str(),
            detail = %violation.detail,
            "policy ended task"
        );
        let node_id = task.next_node.clone().unwrap_or_else(|| task.current_node.clone());
        let failed = failed_task(task, &node_id);
        let result = self
            .db
            .with_tx_async(move |tx| {
                audit_store::insert(tx, &entry)?;
                commit_failure(tx, &failed)
            })
            .await;
        match result {
            Ok(()) => {
                self.metrics.task_failed();
                violation.into()
            }
            Err(e) => e,
        }
    }

    async fn mark_failed(&self, task: Task, node_id: &str) -> Result<(), TaskRunnerError> {
        let failed = failed_task(task, node_id);
        tracing::warn!(node = %node_id, "tool execution failed; task marked FAILED");
        self.db
            .with_tx_async(move |tx| commit_failure(tx, &failed))
            .await?;
        self.metrics.task_failed();
        Ok(())
    }

    // ── Read side ──────────────────────────────────────────────────────

    pub async fn get_task(&self, task_id: &str) -> Result<Task, TaskRunnerError> {
        self.task_store
            .get(task_id)
            .await?
            .ok_or_else(|| TaskRunnerError::UnknownTask(task_id.to_string()))
    }

    /// All tasks, oldest first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, TaskRunnerError> {
        self.task_store.list().await
    }

    pub async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>, TaskRunnerError> {
        self.get_task(task_id).await?;
        self.step_store.list_by_task(task_id).await
    }

    pub async fn list_tool_calls(&self, task_id: &str) -> Result<Vec<ToolCall>, TaskRunnerError> {
        self.get_task(task_id).await?;
        self.tool_call_store.list_by_task(task_id).await
    }

    pub async fn get_tool_call(&self, key: &str) -> Result<Option<ToolCall>, TaskRunnerError> {
        self.tool_call_store.get_by_key(key).await
    }

    pub async fn list_snapshots(
        &self,
        task_id: &str,
    ) -> Result<Vec<GraphStateSnapshot>, TaskRunnerError> {
        self.get_task(task_id).await?;
        self.snapshot_store.list_by_task(task_id).await
    }

    /// Audit entries for one task, or every entry when `task_id` is `None`.
    pub async fn list_audit_entries(
        &self,
        task_id: Option<&str>,
    ) -> Result<Vec<AuditEntry>, TaskRunnerError> {
        match task_id {
            Some(id) => {
                self.get_task(id).await?;
                self.audit_store.list_by_task(id).await
            }
            None => self.audit_store.list().await,
        }
    }

    /// Dry-run `input` against every node of `flow_name` without creating a
    /// task. Rejections are audited with no task attached.
    pub async fn validate_input(&self, flow_name: &str, input: &Value) -> Result<(), TaskRunnerError> {
        let payload = json!({ "flowName": flow_name, "input": input });
        let flow: Arc<FlowGraph> = match self.flows.lookup(flow_name) {
            Ok(flow) => flow,
            Err(err) => {
                let violation = PolicyViolation::new(ViolationKind::UnknownFlow, err.to_string());
                return Err(self.reject(violation, None, None, None, &payload).await);
            }
        };
        if let Err(violation) = self.policy.validate_flow_input(&flow, input) {
            return Err(self.reject(violation, None, None, None, &payload).await);
        }
        Ok(())
    }

    pub async fn metrics_report(&self) -> Result<MetricsReport, TaskRunnerError> {
        let tasks_by_status = self.task_store.count_by_status().await?.into_iter().collect();
        let tool_calls_by_status = self
            .tool_call_store
            .count_by_status()
            .await?
            .into_iter()
            .collect();
        Ok(MetricsReport {
            counters: self.metrics.snapshot(),
            tasks_by_status,
            tool_calls_by_status,
        })
    }
}

fn failed_task(mut task: Task, node_id: &str) -> Task {
    task.status = TaskStatus::Failed;
    task.current_node = node_id.to_string();
    task.next_node = None;
    task.updated_at = Utc::now();
    task
}

/// Status-only update; `step_counter` is untouched.
fn commit_failure(conn: &rusqlite::Connection, task: &Task) -> Result<(), TaskRunnerError> {
    let updated = task_store::update_progress(conn, task, task.step_counter)?;
    if updated != 1 {
        return Err(TaskRunnerError::PersistenceFailure(format!(
            "task {} changed while being failed",
            task.id
        )));
    }
    Ok(())
}
