use rusqlite::{Connection, Row};
use serde_json::Value;

use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::models::audit::{AuditEntry, ViolationKind};

use super::from_millis;

const AUDIT_COLUMNS: &str =
    "id, task_id, step_index, tool_name, violation, detail, payload, created_at";

pub fn insert(conn: &Connection, entry: &AuditEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_logs (id, task_id, step_index, tool_name, violation, detail, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            entry.id,
            entry.task_id,
            entry.step_index,
            entry.tool_name,
            entry.violation.as_str(),
            entry.detail,
            entry.payload.to_string(),
            entry.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM audit_logs ORDER BY created_at ASC, rowid ASC",
        AUDIT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], row_to_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_by_task(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM audit_logs WHERE task_id = ?1 ORDER BY created_at ASC, rowid ASC",
        AUDIT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![task_id], row_to_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let payload_str: String = row.get(6)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        step_index: row.get(2)?,
        tool_name: row.get(3)?,
        violation: ViolationKind::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(ViolationKind::SchemaViolation),
        detail: row.get(5)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(Value::Null),
        created_at: from_millis(row.get(7)?),
    })
}

#[derive(Clone)]
pub struct AuditStore {
    db: Database,
}

impl AuditStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(&self, entry: &AuditEntry) -> Result<(), TaskRunnerError> {
        let e = entry.clone();
        self.db.with_conn_async(move |conn| insert(conn, &e)).await
    }

    pub async fn list(&self) -> Result<Vec<AuditEntry>, TaskRunnerError> {
        self.db.with_conn_async(list).await
    }

    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<AuditEntry>, TaskRunnerError> {
        let id = task_id.to_string();
        self.db.with_conn_async(move |conn| list_by_task(conn, &id)).await
    }
}
