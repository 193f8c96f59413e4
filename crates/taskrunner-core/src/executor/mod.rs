//! Idempotent tool executor.
//!
//! Each invocation is identified by `task_id:step_index:tool_name`. The
//! first caller inserts a STARTED row; every attempt's outcome is written
//! back before the next attempt begins, so a worker that crashes mid-retry
//! leaves enough behind for the next worker to resume from the recorded
//! `retry_count`. A COMPLETED row is final: its output is returned as-is
//! and the tool is not invoked again.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::config::RetryConfig;
use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::metrics::Metrics;
use crate::models::{ToolCall, ToolCallStatus};
use crate::store::tool_call_store;
use crate::tools::{Tool, ToolRegistry};
use crate::trace::new_span_id;

pub fn idempotency_key(task_id: &str, step_index: i64, tool_name: &str) -> String {
    format!("{}:{}:{}", task_id, step_index, tool_name)
}

/// Bounded exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor.max(1),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `failed_attempts` failures
    /// (`min(base * factor^(n-1), max)`); zero before the first attempt.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let multiplier = self
            .factor
            .checked_pow(failed_attempts - 1)
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Result of [`IdempotentExecutor::execute`].
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: Value,
    /// Failed attempts recorded on the call row.
    pub retry_count: i64,
    /// `true` when a previously completed call was returned.
    pub reused: bool,
    pub span_id: String,
    pub idempotency_key: String,
}

pub struct IdempotentExecutor {
    db: Database,
    tools: Arc<ToolRegistry>,
    retry: RetryPolicy,
    tool_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl IdempotentExecutor {
    pub fn new(
        db: Database,
        tools: Arc<ToolRegistry>,
        retry: RetryPolicy,
        tool_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            db,
            tools,
            retry,
            tool_timeout,
            metrics,
        }
    }

    /// Execute `tool_name` for the given step at most once to success.
    ///
    /// `input` is only used when no row exists yet; a resumed or completed
    /// call keeps the input recorded by its first caller.
    pub async fn execute(
        &self,
        task_id: &str,
        step_index: i64,
        tool_name: &str,
        input: &Value,
    ) -> Result<ToolOutcome, TaskRunnerError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| TaskRunnerError::UnknownTool(tool_name.to_string()))?;

        let key = idempotency_key(task_id, step_index, tool_name);
        let fresh = ToolCall::new(
            key.clone(),
            task_id.to_string(),
            step_index,
            tool_name.to_string(),
            input.clone(),
            new_span_id(),
        );

        let lookup_key = key.clone();
        let (created, call) = self
            .db
            .with_tx_async(move |tx| {
                let created = tool_call_store::insert_if_absent(tx, &fresh)?;
                let row = tool_call_store::get_by_key(tx, &lookup_key)?.ok_or_else(|| {
                    TaskRunnerError::PersistenceFailure(format!(
                        "tool call {} vanished after insert",
                        lookup_key
                    ))
                })?;
                Ok((created, row))
            })
            .await?;

        let span = tracing::info_span!(
            "tool_call",
            task_id = %task_id,
            span_id = %call.span_id,
            tool = %tool_name,
            step_index,
        );

        async move {
            match call.status {
                ToolCallStatus::Completed => {
                    self.metrics.tool_reused();
                    tracing::info!(key = %call.idempotency_key, "reusing completed tool call");
                    Ok(ToolOutcome {
                        output: call.output_payload.clone().unwrap_or(Value::Null),
                        retry_count: call.retry_count,
                        reused: true,
                        span_id: call.span_id,
                        idempotency_key: call.idempotency_key,
                    })
                }
                ToolCallStatus::Failed
                    if call.retry_count >= i64::from(self.retry.max_attempts) =>
                {
                    tracing::warn!(key = %call.idempotency_key, "tool call already exhausted its retries");
                    Err(TaskRunnerError::ToolExecutionFailed(exhausted_message(&call)))
                }
                _ => {
                    if !created {
                        tracing::info!(
                            key = %call.idempotency_key,
                            retry_count = call.retry_count,
                            "resuming unfinished tool call"
                        );
                    }
                    self.run_attempts(tool, call).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_attempts(
        &self,
        tool: Arc<dyn Tool>,
        mut call: ToolCall,
    ) -> Result<ToolOutcome, TaskRunnerError> {
        let max_attempts = i64::from(self.retry.max_attempts);

        while call.retry_count < max_attempts {
            if call.retry_count > 0 {
                let failed = u32::try_from(call.retry_count).unwrap_or(u32::MAX);
                tokio::time::sleep(self.retry.delay_for(failed)).await;
                self.metrics.tool_retried();
            }
            self.metrics.tool_invoked();

            match self.attempt(tool.clone(), &call.input_payload).await {
                Ok(output) => {
                    call.status = ToolCallStatus::Completed;
                    call.output_payload = Some(output.clone());
                    call.finished_at = Some(Utc::now());
                    self.persist(&call).await?;
                    tracing::info!(retry_count = call.retry_count, "tool call completed");
                    return Ok(ToolOutcome {
                        output,
                        retry_count: call.retry_count,
                        reused: false,
                        span_id: call.span_id,
                        idempotency_key: call.idempotency_key,
                    });
                }
                Err(error) => {
                    call.retry_count += 1;
                    tracing::warn!(
                        attempt = call.retry_count,
                        max_attempts,
                        error = %error,
                        "tool attempt failed"
                    );
                    call.last_error = Some(error);
                    if call.retry_count >= max_attempts {
                        call.status = ToolCallStatus::Failed;
                        call.finished_at = Some(Utc::now());
                    }
                    self.persist(&call).await?;
                }
            }
        }

        call.status = ToolCallStatus::Failed;
        Err(TaskRunnerError::ToolExecutionFailed(exhausted_message(&call)))
    }

    /// One bounded invocation plus output validation.
    async fn attempt(&self, tool: Arc<dyn Tool>, input: &Value) -> Result<Value, String> {
        let input = input.clone();
        let worker = tool.clone();
        let handle = tokio::task::spawn_blocking(move || worker.invoke(&input));

        // A timed-out invocation keeps running on the blocking pool; its
        // result is discarded.
        let output = match tokio::time::timeout(self.tool_timeout, handle).await {
            Err(_) => {
                return Err(format!(
                    "timed out after {:.3}s",
                    self.tool_timeout.as_secs_f64()
                ))
            }
            Ok(Err(join)) => return Err(format!("tool panicked: {}", join)),
            Ok(Ok(Err(tool_error))) => return Err(tool_error.to_string()),
            Ok(Ok(Ok(output))) => output,
        };

        tool.output_schema()
            .validate(&output)
            .map_err(|e| format!("invalid tool output: {}", e))?;
        Ok(output)
    }

    async fn persist(&self, call: &ToolCall) -> Result<(), TaskRunnerError> {
        let call = call.clone();
        self.db
            .with_conn_async(move |conn| tool_call_store::update_attempt(conn, &call))
            .await?;
        Ok(())
    }
}

fn exhausted_message(call: &ToolCall) -> String {
    format!(
        "tool '{}' failed after {} attempts: {}",
        call.tool_name,
        call.retry_count,
        call.last_error.as_deref().unwrap_or("unknown error")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use crate::store::task_store;
    use crate::tools::{FieldKind, FieldSpec, ToolError, ToolSchema};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicU32, Ordering};

    const N_SCHEMA: ToolSchema = ToolSchema::new(&[FieldSpec::required("n", FieldKind::Integer)]);

    /// Fails its first `failures` invocations, then returns `{n}`.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn input_schema(&self) -> &ToolSchema {
            &N_SCHEMA
        }
        fn output_schema(&self) -> &ToolSchema {
            &N_SCHEMA
        }
        fn invoke(&self, input: &Value) -> Result<Value, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ToolError::new(format!("transient failure {}", call + 1)));
            }
            Ok(json!({ "n": input["n"] }))
        }
    }

    struct Sleepy;

    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn input_schema(&self) -> &ToolSchema {
            &N_SCHEMA
        }
        fn output_schema(&self) -> &ToolSchema {
            &N_SCHEMA
        }
        fn invoke(&self, input: &Value) -> Result<Value, ToolError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(input.clone())
        }
    }

    struct Liar;

    impl Tool for Liar {
        fn name(&self) -> &str {
            "liar"
        }
        fn input_schema(&self) -> &ToolSchema {
            &N_SCHEMA
        }
        fn output_schema(&self) -> &ToolSchema {
            &N_SCHEMA
        }
        fn invoke(&self, _input: &Value) -> Result<Value, ToolError> {
            Ok(json!({ "n": "not a number" }))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            factor: 2,
            max_delay: Duration::from_millis(5),
        }
    }

    fn setup(tool: Arc<dyn Tool>, timeout: Duration) -> (Database, IdempotentExecutor, Arc<Metrics>) {
        let db = Database::open_in_memory().unwrap();
        let task = Task::new(
            "t1".into(),
            "test".into(),
            "n".into(),
            Map::new(),
            "0".repeat(32),
        );
        db.with_conn(|conn| task_store::insert(conn, &task)).unwrap();

        let mut tools = ToolRegistry::builtin();
        tools.register(tool);
        let metrics = Arc::new(Metrics::new());
        let executor = IdempotentExecutor::new(
            db.clone(),
            Arc::new(tools),
            fast_retry(),
            timeout,
            metrics.clone(),
        );
        (db, executor, metrics)
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(6), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_idempotency_key_format() {
        assert_eq!(idempotency_key("t1", 3, "echo"), "t1:3:echo");
    }

    #[tokio::test]
    async fn test_success_after_two_failures_records_two_retries() {
        let tool = flaky(2);
        let (db, executor, metrics) = setup(tool.clone(), Duration::from_secs(2));

        let outcome = executor.execute("t1", 0, "flaky", &json!({"n": 7})).await.unwrap();
        assert_eq!(outcome.output, json!({"n": 7}));
        assert_eq!(outcome.retry_count, 2);
        assert!(!outcome.reused);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);

        let row = db
            .with_conn(|conn| tool_call_store::get_by_key(conn, "t1:0:flaky"))
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ToolCallStatus::Completed);
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.last_error.as_deref(), Some("transient failure 2"));
        assert!(row.finished_at.is_some());

        let snap = metrics.snapshot();
        assert_eq!(snap.tool_invocations, 3);
        assert_eq!(snap.tool_retries, 2);
    }

    #[tokio::test]
    async fn test_completed_call_is_reused_without_invoking() {
        let tool = flaky(0);
        let (_db, executor, metrics) = setup(tool.clone(), Duration::from_secs(2));

        executor.execute("t1", 0, "flaky", &json!({"n": 1})).await.unwrap();
        let again = executor.execute("t1", 0, "flaky", &json!({"n": 99})).await.unwrap();

        assert!(again.reused);
        assert_eq!(again.output, json!({"n": 1}));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().tool_reuses, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_marks_failed_and_is_final() {
        let tool = flaky(10);
        let (db, executor, _metrics) = setup(tool.clone(), Duration::from_secs(2));

        let err = executor.execute("t1", 0, "flaky", &json!({"n": 1})).await.unwrap_err();
        assert_eq!(err.kind(), "TOOL_EXECUTION_FAILED");
        assert!(err.to_string().contains("transient failure 3"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);

        let row = db
            .with_conn(|conn| tool_call_store::get_by_key(conn, "t1:0:flaky"))
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ToolCallStatus::Failed);
        assert_eq!(row.retry_count, 3);
        assert!(row.output_payload.is_none());

        // Budget spent: a second call fails without invoking the tool.
        let err = executor.execute("t1", 0, "flaky", &json!({"n": 1})).await.unwrap_err();
        assert_eq!(err.kind(), "TOOL_EXECUTION_FAILED");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resumes_started_row_from_recorded_retry_count() {
        let tool = flaky(0);
        let (db, executor, _metrics) = setup(tool.clone(), Duration::from_secs(2));

        // A worker crashed after one failed attempt.
        let mut crashed = ToolCall::new(
            "t1:0:flaky".into(),
            "t1".into(),
            0,
            "flaky".into(),
            json!({"n": 5}),
            "a".repeat(16),
        );
        crashed.retry_count = 1;
        crashed.last_error = Some("worker died".into());
        db.with_conn(|conn| tool_call_store::insert_if_absent(conn, &crashed))
            .unwrap();

        let outcome = executor.execute("t1", 0, "flaky", &json!({"n": 6})).await.unwrap();
        assert_eq!(outcome.output, json!({"n": 5}));
        assert_eq!(outcome.retry_count, 1);
        assert_eq!(outcome.span_id, "a".repeat(16));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let (db, executor, _metrics) = setup(Arc::new(Sleepy), Duration::from_millis(20));

        let err = executor.execute("t1", 0, "sleepy", &json!({"n": 1})).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));

        let row = db
            .with_conn(|conn| tool_call_store::get_by_key(conn, "t1:0:sleepy"))
            .unwrap()
            .unwrap();
        assert_eq!(row.retry_count, 3);
        assert!(row.last_error.unwrap().starts_with("timed out after"));
    }

    #[tokio::test]
    async fn test_invalid_output_is_a_tool_failure() {
        let (_db, executor, _metrics) = setup(Arc::new(Liar), Duration::from_secs(2));
        let err = executor.execute("t1", 0, "liar", &json!({"n": 1})).await.unwrap_err();
        assert!(err.to_string().contains("invalid tool output"));
    }
}
