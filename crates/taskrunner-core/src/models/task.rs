use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a task: `PLANNED → RUNNING → {COMPLETED | FAILED}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PLANNED")]
    Planned,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Planned,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PLANNED" => Some(Self::Planned),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One execution instance of a flow.
///
/// While the task is `PLANNED` or `RUNNING`, `current_node` and `next_node`
/// both name the node the next advance will execute. Once terminal,
/// `current_node` is the last executed node and `next_node` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub flow_name: String,
    pub status: TaskStatus,
    pub current_node: String,
    pub next_node: Option<String>,
    pub input_payload: Value,
    pub state: Map<String, Value>,
    pub trace_id: String,
    pub step_counter: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: String,
        flow_name: String,
        entry_node: String,
        input: Map<String, Value>,
        trace_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            flow_name,
            status: TaskStatus::Planned,
            current_node: entry_node.clone(),
            next_node: Some(entry_node),
            input_payload: Value::Object(input.clone()),
            state: input,
            trace_id,
            step_counter: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Keys currently present in the accumulated state, in insertion order.
    pub fn state_keys(&self) -> Vec<&str> {
        self.state.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_planned_at_entry() {
        let mut input = Map::new();
        input.insert("text".into(), Value::from("hi"));
        let task = Task::new(
            "t1".into(),
            "echo_add".into(),
            "echo".into(),
            input,
            "0".repeat(32),
        );
        assert_eq!(task.status, TaskStatus::Planned);
        assert_eq!(task.current_node, "echo");
        assert_eq!(task.next_node.as_deref(), Some("echo"));
        assert_eq!(task.step_counter, 0);
        assert_eq!(task.state_keys(), vec!["text"]);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
