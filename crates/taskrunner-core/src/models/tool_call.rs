use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToolCallStatus {
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(Self::Started),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One idempotent tool invocation, keyed by `task_id:step_index:tool_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub idempotency_key: String,
    pub task_id: String,
    pub step_index: i64,
    pub tool_name: String,
    pub status: ToolCallStatus,
    pub input_payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_payload: Option<Value>,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub span_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    pub fn new(
        idempotency_key: String,
        task_id: String,
        step_index: i64,
        tool_name: String,
        input_payload: Value,
        span_id: String,
    ) -> Self {
        Self {
            idempotency_key,
            task_id,
            step_index,
            tool_name,
            status: ToolCallStatus::Started,
            input_payload,
            output_payload: None,
            retry_count: 0,
            last_error: None,
            span_id,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Wall-clock duration of the call, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
            .filter(|ms| *ms >= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration_only_once_finished() {
        let mut call = ToolCall::new(
            "t:0:echo".into(),
            "t".into(),
            0,
            "echo".into(),
            json!({"text": "hi"}),
            "span".into(),
        );
        assert_eq!(call.duration_ms(), None);

        call.finished_at = Some(call.started_at + chrono::Duration::milliseconds(42));
        assert_eq!(call.duration_ms(), Some(42));
    }
}
