//! Row-level persistence for every entity the engine writes.
//!
//! Each module exposes plain functions over a `&Connection` so the engine
//! can compose several writes inside one transaction, plus a small store
//! handle with async read helpers for adapters.

pub mod audit_store;
pub mod snapshot_store;
pub mod step_store;
pub mod task_store;
pub mod tool_call_store;

pub use audit_store::AuditStore;
pub use snapshot_store::SnapshotStore;
pub use step_store::StepStore;
pub use task_store::TaskStore;
pub use tool_call_store::ToolCallStore;

use chrono::{DateTime, Utc};

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
