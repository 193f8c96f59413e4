use rusqlite::{Connection, Row};
use serde_json::Value;

use crate::db::Database;
use crate::error::TaskRunnerError;
use crate::models::snapshot::GraphStateSnapshot;

use super::from_millis;

pub fn insert(conn: &Connection, snapshot: &GraphStateSnapshot) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO graph_state_snapshots (task_id, step_index, current_node, next_node, state, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            snapshot.task_id,
            snapshot.step_index,
            snapshot.current_node,
            snapshot.next_node,
            Value::Object(snapshot.state.clone()).to_string(),
            snapshot.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn list_by_task(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<GraphStateSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, step_index, current_node, next_node, state, created_at
         FROM graph_state_snapshots WHERE task_id = ?1 ORDER BY step_index ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![task_id], row_to_snapshot)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<GraphStateSnapshot> {
    let state_str: String = row.get(4)?;
    Ok(GraphStateSnapshot {
        task_id: row.get(0)?,
        step_index: row.get(1)?,
        current_node: row.get(2)?,
        next_node: row.get(3)?,
        state: serde_json::from_str(&state_str).unwrap_or_default(),
        created_at: from_millis(row.get(5)?),
    })
}

#[derive(Clone)]
pub struct SnapshotStore {
    db: Database,
}

impl SnapshotStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list_by_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<GraphStateSnapshot>, TaskRunnerError> {
        let id = task_id.to_string();
        self.db.with_conn_async(move |conn| list_by_task(conn, &id)).await
    }
}
