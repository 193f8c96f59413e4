use rusqlite::{Connection, Row};

use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::models::step::{Step, StepStatus};

use super::from_millis;

pub fn insert(conn: &Connection, step: &Step) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO task_steps (task_id, step_index, node_id, tool_name, span_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            step.task_id,
            step.step_index,
            step.node_id,
            step.tool_name,
            step.span_id,
            step.status.as_str(),
            step.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn list_by_task(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<Step>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, step_index, node_id, tool_name, span_id, status, created_at
         FROM task_steps WHERE task_id = ?1 ORDER BY step_index ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![task_id], row_to_step)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        task_id: row.get(0)?,
        step_index: row.get(1)?,
        node_id: row.get(2)?,
        tool_name: row.get(3)?,
        span_id: row.get(4)?,
        status: StepStatus::from_str(&row.get::<_, String>(5)?).unwrap_or(StepStatus::Completed),
        created_at: from_millis(row.get(6)?),
    })
}

#[derive(Clone)]
pub struct StepStore {
    db: Database,
}

impl StepStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<Step>, TaskRunnerError> {
        let id = task_id.to_string();
        self.db.with_conn_async(move |conn| list_by_task(conn, &id)).await
    }
}
