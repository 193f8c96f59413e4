//! CLI command implementations.
//!
//! Each submodule corresponds to a group of CLI commands and drives the
//! core engine through `AppState`.

pub mod catalog;
pub mod metrics;
pub mod server;
pub mod task;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use taskrunner_core::{AppState, AppStateInner, Database, RunnerConfig};

/// Open the database and load runner configuration.
pub fn init_state(db_path: &str, config_path: Option<&str>) -> Result<AppState, String> {
    let config = RunnerConfig::load(config_path.map(Path::new)).map_err(|e| e.to_string())?;
    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;
    Ok(Arc::new(AppStateInner::new(db, config)))
}

/// Parse a `--input` argument as JSON.
pub fn parse_input(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid --input JSON: {}", e))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
