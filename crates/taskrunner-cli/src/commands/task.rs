//! `taskrunner create|advance|run|get|list|show`: task commands.

use serde_json::{json, Value};
use taskrunner_core::models::ToolCall;
use taskrunner_core::AppState;

use super::{parse_input, print_json};

pub async fn create(state: &AppState, flow: &str, input: &str) -> Result<(), String> {
    let input = parse_input(input)?;
    let task = state
        .engine
        .create_task(flow, input)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({ "task": task }));
    Ok(())
}

pub async fn advance(state: &AppState, task_id: &str) -> Result<(), String> {
    let task = state
        .engine
        .advance(task_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({ "task": task }));
    Ok(())
}

pub async fn run(state: &AppState, task_id: &str, max_steps: usize) -> Result<(), String> {
    let task = state
        .engine
        .run(task_id, max_steps)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({ "task": task }));
    Ok(())
}

pub async fn get(state: &AppState, task_id: &str) -> Result<(), String> {
    let task = state
        .engine
        .get_task(task_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({ "task": task }));
    Ok(())
}

pub async fn list(state: &AppState) -> Result<(), String> {
    let tasks = state.engine.list_tasks().await.map_err(|e| e.to_string())?;
    print_json(&json!({ "tasks": tasks }));
    Ok(())
}

/// Full history of one task.
pub async fn show(state: &AppState, task_id: &str) -> Result<(), String> {
    let engine = &state.engine;
    let task = engine.get_task(task_id).await.map_err(|e| e.to_string())?;
    let steps = engine.list_steps(task_id).await.map_err(|e| e.to_string())?;
    let tool_calls = engine
        .list_tool_calls(task_id)
        .await
        .map_err(|e| e.to_string())?
        .iter()
        .map(tool_call_view)
        .collect::<Result<Vec<_>, _>>()?;
    let snapshots = engine
        .list_snapshots(task_id)
        .await
        .map_err(|e| e.to_string())?;
    let audit = engine
        .list_audit_entries(Some(task_id))
        .await
        .map_err(|e| e.to_string())?;

    print_json(&json!({
        "task": task,
        "steps": steps,
        "toolCalls": tool_calls,
        "snapshots": snapshots,
        "audit": audit,
    }));
    Ok(())
}

/// Tool call row plus its wall-clock duration.
fn tool_call_view(call: &ToolCall) -> Result<Value, String> {
    let mut view = serde_json::to_value(call).map_err(|e| e.to_string())?;
    if let Value::Object(fields) = &mut view {
        fields.insert("durationMs".to_string(), json!(call.duration_ms()));
    }
    Ok(view)
}
