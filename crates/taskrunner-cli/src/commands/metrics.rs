//! `taskrunner metrics`
//!
//! Counters are per process, so from the CLI only the row counts by status
//! reflect work done by other processes.

use serde_json::json;
use taskrunner_core::AppState;

use super::print_json;

pub async fn show(state: &AppState) -> Result<(), String> {
    let report = state
        .engine
        .metrics_report()
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({ "metrics": report }));
    Ok(())
}
