use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of policy violation recorded in the audit log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViolationKind {
    #[serde(rename = "UNKNOWN_FLOW")]
    UnknownFlow,
    #[serde(rename = "UNKNOWN_TOOL")]
    UnknownTool,
    #[serde(rename = "SCHEMA_VIOLATION")]
    SchemaViolation,
    #[serde(rename = "PAYLOAD_TOO_LARGE")]
    PayloadTooLarge,
    #[serde(rename = "STEP_LIMIT_EXCEEDED")]
    StepLimitExceeded,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownFlow => "UNKNOWN_FLOW",
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::StepLimitExceeded => "STEP_LIMIT_EXCEEDED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN_FLOW" => Some(Self::UnknownFlow),
            "UNKNOWN_TOOL" => Some(Self::UnknownTool),
            "SCHEMA_VIOLATION" => Some(Self::SchemaViolation),
            "PAYLOAD_TOO_LARGE" => Some(Self::PayloadTooLarge),
            "STEP_LIMIT_EXCEEDED" => Some(Self::StepLimitExceeded),
            _ => None,
        }
    }

    /// Step-limit violations end the task; the others only reject the attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StepLimitExceeded)
    }
}

/// Append-only record of a rejected invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub violation: ViolationKind,
    pub detail: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
