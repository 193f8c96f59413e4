//! Core error type for the task runner.
//!
//! `TaskRunnerError` is used throughout the core (stores, engine, executor).
//! Every variant carries a human-readable detail and maps to a stable
//! `kind()` code that adapters surface to callers. When the `axum` feature
//! is enabled, it also implements `IntoResponse`.

#[derive(Debug, thiserror::Error)]
pub enum TaskRunnerError {
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Step limit exceeded: {0}")]
    StepLimitExceeded(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl TaskRunnerError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownFlow(_) => "UNKNOWN_FLOW",
            Self::UnknownTask(_) => "UNKNOWN_TASK",
            Self::UnknownTool(_) => "UNKNOWN_TOOL",
            Self::SchemaViolation(_) => "SCHEMA_VIOLATION",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::StepLimitExceeded(_) => "STEP_LIMIT_EXCEEDED",
            Self::ToolExecutionFailed(_) => "TOOL_EXECUTION_FAILED",
            Self::LockTimeout(_) => "LOCK_TIMEOUT",
            Self::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
        }
    }

    /// Policy-class errors are the ones recorded in the audit log.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::UnknownFlow(_)
                | Self::UnknownTool(_)
                | Self::SchemaViolation(_)
                | Self::PayloadTooLarge(_)
                | Self::StepLimitExceeded(_)
        )
    }

    /// Infrastructure failures never mutate task status.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::PersistenceFailure(_))
    }
}

impl From<rusqlite::Error> for TaskRunnerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for TaskRunnerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            TaskRunnerError::UnknownFlow(_) | TaskRunnerError::UnknownTask(_) => {
                StatusCode::NOT_FOUND
            }
            TaskRunnerError::UnknownTool(_)
            | TaskRunnerError::SchemaViolation(_)
            | TaskRunnerError::PayloadTooLarge(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TaskRunnerError::StepLimitExceeded(_) | TaskRunnerError::ToolExecutionFailed(_) => {
                StatusCode::CONFLICT
            }
            TaskRunnerError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            TaskRunnerError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string(), "kind": self.kind() });
        (status, axum::Json(body)).into_response()
    }
}
