//! SQLite persistence layer for the task runner.
//!
//! Uses rusqlite with WAL mode so several worker processes can share one
//! database file. All database operations are executed via
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//!
//! Multi-row commits go through [`Database::with_tx`], which opens an
//! `IMMEDIATE` transaction: the write lock is taken up front and the whole
//! unit either commits or rolls back.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TaskRunnerError;

/// How long a connection waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, TaskRunnerError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).map_err(|e| {
            TaskRunnerError::PersistenceFailure(format!("Failed to open database: {}", e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| {
                TaskRunnerError::PersistenceFailure(format!("Failed to set pragmas: {}", e))
            })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, TaskRunnerError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TaskRunnerError::PersistenceFailure(format!("Failed to open in-memory db: {}", e))
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(|e| {
            TaskRunnerError::PersistenceFailure(format!("Failed to set pragmas: {}", e))
        })?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, TaskRunnerError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().map_err(|e| {
            TaskRunnerError::PersistenceFailure(format!("Lock poisoned: {}", e))
        })?;
        f(&conn).map_err(TaskRunnerError::from)
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, TaskRunnerError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| TaskRunnerError::PersistenceFailure(format!("Task join error: {}", e)))?
    }

    /// Run a closure inside one `IMMEDIATE` transaction.
    ///
    /// The transaction commits only if the closure returns `Ok`; any error
    /// (including a domain error raised by the closure) rolls everything back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, TaskRunnerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, TaskRunnerError>,
    {
        let mut conn = self.conn.lock().map_err(|e| {
            TaskRunnerError::PersistenceFailure(format!("Lock poisoned: {}", e))
        })?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Async-friendly variant of [`Database::with_tx`].
    pub async fn with_tx_async<F, T>(&self, f: F) -> Result<T, TaskRunnerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, TaskRunnerError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_tx(f))
            .await
            .map_err(|e| TaskRunnerError::PersistenceFailure(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), TaskRunnerError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id              TEXT PRIMARY KEY,
                    flow_name       TEXT NOT NULL,
                    status          TEXT NOT NULL DEFAULT 'PLANNED',
                    current_node    TEXT NOT NULL,
                    next_node       TEXT,
                    input_payload   TEXT NOT NULL DEFAULT '{}',
                    state           TEXT NOT NULL DEFAULT '{}',
                    trace_id        TEXT NOT NULL,
                    step_counter    INTEGER NOT NULL DEFAULT 0,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

                CREATE TABLE IF NOT EXISTS task_steps (
                    task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    step_index      INTEGER NOT NULL,
                    node_id         TEXT NOT NULL,
                    tool_name       TEXT NOT NULL,
                    span_id         TEXT NOT NULL UNIQUE,
                    status          TEXT NOT NULL,
                    created_at      INTEGER NOT NULL,
                    PRIMARY KEY (task_id, step_index)
                );

                CREATE TABLE IF NOT EXISTS tool_calls (
                    idempotency_key TEXT PRIMARY KEY,
                    task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    step_index      INTEGER NOT NULL,
                    tool_name       TEXT NOT NULL,
                    status          TEXT NOT NULL DEFAULT 'STARTED',
                    input_payload   TEXT NOT NULL DEFAULT '{}',
                    output_payload  TEXT,
                    retry_count     INTEGER NOT NULL DEFAULT 0,
                    last_error      TEXT,
                    span_id         TEXT NOT NULL,
                    started_at      INTEGER NOT NULL,
                    finished_at     INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_tool_calls_task ON tool_calls(task_id);

                CREATE TABLE IF NOT EXISTS graph_state_snapshots (
                    task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    step_index      INTEGER NOT NULL,
                    current_node    TEXT NOT NULL,
                    next_node       TEXT,
                    state           TEXT NOT NULL,
                    created_at      INTEGER NOT NULL,
                    PRIMARY KEY (task_id, step_index)
                );

                CREATE TABLE IF NOT EXISTS audit_logs (
                    id              TEXT PRIMARY KEY,
                    task_id         TEXT REFERENCES tasks(id) ON DELETE SET NULL,
                    step_index      INTEGER,
                    tool_name       TEXT,
                    violation       TEXT NOT NULL,
                    detail          TEXT NOT NULL,
                    payload         TEXT NOT NULL DEFAULT '{}',
                    created_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_logs_task ON audit_logs(task_id);

                CREATE TABLE IF NOT EXISTS task_leases (
                    task_id         TEXT PRIMARY KEY,
                    owner           TEXT NOT NULL,
                    expires_at      INTEGER NOT NULL
                );
                ",
            )
        })
    }
}
