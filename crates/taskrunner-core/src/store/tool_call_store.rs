use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::models::tool_call::{ToolCall, ToolCallStatus};

use super::from_millis;

const TOOL_CALL_COLUMNS: &str = "idempotency_key, task_id, step_index, tool_name, status,
     input_payload, output_payload, retry_count, last_error, span_id, started_at, finished_at";

/// Insert a fresh call row unless one already exists for the key.
/// Returns `true` if this call created the row.
pub fn insert_if_absent(conn: &Connection, call: &ToolCall) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO tool_calls (idempotency_key, task_id, step_index, tool_name, status,
         input_payload, output_payload, retry_count, last_error, span_id, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(idempotency_key) DO NOTHING",
        rusqlite::params![
            call.idempotency_key,
            call.task_id,
            call.step_index,
            call.tool_name,
            call.status.as_str(),
            call.input_payload.to_string(),
            call.output_payload.as_ref().map(|v| v.to_string()),
            call.retry_count,
            call.last_error,
            call.span_id,
            call.started_at.timestamp_millis(),
            call.finished_at.map(|t| t.timestamp_millis()),
        ],
    )?;
    Ok(inserted == 1)
}

/// Persist the outcome of an attempt. Completed rows are never rewritten.
pub fn update_attempt(conn: &Connection, call: &ToolCall) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE tool_calls SET
           status = ?1,
           output_payload = ?2,
           retry_count = ?3,
           last_error = ?4,
           finished_at = ?5
         WHERE idempotency_key = ?6 AND status != 'COMPLETED'",
        rusqlite::params![
            call.status.as_str(),
            call.output_payload.as_ref().map(|v| v.to_string()),
            call.retry_count,
            call.last_error,
            call.finished_at.map(|t| t.timestamp_millis()),
            call.idempotency_key,
        ],
    )
}

pub fn get_by_key(conn: &Connection, key: &str) -> rusqlite::Result<Option<ToolCall>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tool_calls WHERE idempotency_key = ?1",
        TOOL_CALL_COLUMNS
    ))?;
    stmt.query_row(rusqlite::params![key], row_to_tool_call)
        .optional()
}

pub fn list_by_task(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<ToolCall>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tool_calls WHERE task_id = ?1 ORDER BY step_index ASC, started_at ASC",
        TOOL_CALL_COLUMNS
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![task_id], row_to_tool_call)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_by_status(conn: &Connection) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM tool_calls GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_tool_call(row: &Row<'_>) -> rusqlite::Result<ToolCall> {
    let input_str: String = row.get(5)?;
    let output_str: Option<String> = row.get(6)?;
    let finished_ms: Option<i64> = row.get(11)?;

    Ok(ToolCall {
        idempotency_key: row.get(0)?,
        task_id: row.get(1)?,
        step_index: row.get(2)?,
        tool_name: row.get(3)?,
        status: ToolCallStatus::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(ToolCallStatus::Started),
        input_payload: serde_json::from_str(&input_str).unwrap_or(Value::Null),
        output_payload: output_str.and_then(|s| serde_json::from_str(&s).ok()),
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        span_id: row.get(9)?,
        started_at: from_millis(row.get(10)?),
        finished_at: finished_ms.map(from_millis),
    })
}

#[derive(Clone)]
pub struct ToolCallStore {
    db: Database,
}

impl ToolCallStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Option<ToolCall>, TaskRunnerError> {
        let k = key.to_string();
        self.db.with_conn_async(move |conn| get_by_key(conn, &k)).await
    }

    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<ToolCall>, TaskRunnerError> {
        let id = task_id.to_string();
        self.db.with_conn_async(move |conn| list_by_task(conn, &id)).await
    }

    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, TaskRunnerError> {
        self.db.with_conn_async(count_by_status).await
    }
}
