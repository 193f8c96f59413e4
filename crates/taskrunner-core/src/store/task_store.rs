use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::models::task::{Task, TaskStatus};

use super::from_millis;

const TASK_COLUMNS: &str = "id, flow_name, status, current_node, next_node, input_payload, state,
     trace_id, step_counter, created_at, updated_at";

pub fn insert(conn: &Connection, task: &Task) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, flow_name, status, current_node, next_node, input_payload, state,
         trace_id, step_counter, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            task.id,
            task.flow_name,
            task.status.as_str(),
            task.current_node,
            task.next_node,
            task.input_payload.to_string(),
            Value::Object(task.state.clone()).to_string(),
            task.trace_id,
            task.step_counter,
            task.created_at.timestamp_millis(),
            task.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, task_id: &str) -> rusqlite::Result<Option<Task>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))?;
    stmt.query_row(rusqlite::params![task_id], row_to_task)
        .optional()
}

/// Write the mutable columns of `task`, but only if nobody committed a step
/// since it was read. Returns the number of rows updated (0 or 1).
pub fn update_progress(
    conn: &Connection,
    task: &Task,
    expected_step_counter: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE tasks SET
           status = ?1,
           current_node = ?2,
           next_node = ?3,
           state = ?4,
           step_counter = ?5,
           updated_at = ?6
         WHERE id = ?7 AND step_counter = ?8",
        rusqlite::params![
            task.status.as_str(),
            task.current_node,
            task.next_node,
            Value::Object(task.state.clone()).to_string(),
            task.step_counter,
            task.updated_at.timestamp_millis(),
            task.id,
            expected_step_counter,
        ],
    )
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tasks ORDER BY created_at ASC, id ASC",
        TASK_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], row_to_task)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_by_status(conn: &Connection) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let input_str: String = row.get(5)?;
    let state_str: String = row.get(6)?;
    let state: Map<String, Value> = serde_json::from_str(&state_str).unwrap_or_default();

    Ok(Task {
        id: row.get(0)?,
        flow_name: row.get(1)?,
        status: TaskStatus::from_str(&row.get::<_, String>(2)?).unwrap_or(TaskStatus::Planned),
        current_node: row.get(3)?,
        next_node: row.get(4)?,
        input_payload: serde_json::from_str(&input_str).unwrap_or(Value::Null),
        state,
        trace_id: row.get(7)?,
        step_counter: row.get(8)?,
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, task: &Task) -> Result<(), TaskRunnerError> {
        let t = task.clone();
        self.db.with_conn_async(move |conn| insert(conn, &t)).await
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, TaskRunnerError> {
        let id = task_id.to_string();
        self.db.with_conn_async(move |conn| get(conn, &id)).await
    }

    pub async fn list(&self) -> Result<Vec<Task>, TaskRunnerError> {
        self.db.with_conn_async(list).await
    }

    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, TaskRunnerError> {
        self.db.with_conn_async(count_by_status).await
    }
}
