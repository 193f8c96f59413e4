use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Copy of a task's accumulated state taken right after a step commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStateSnapshot {
    pub task_id: String,
    pub step_index: i64,
    pub current_node: String,
    pub next_node: Option<String>,
    pub state: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}
