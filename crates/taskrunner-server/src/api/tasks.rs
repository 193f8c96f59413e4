use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use taskrunner_core::models::Task;
use taskrunner_core::{AppState, TaskRunnerError};

/// Advances a `run` request performs when `maxSteps` is omitted.
const DEFAULT_RUN_STEPS: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/{id}", get(get_task))
        .route("/{id}/advance", post(advance_task))
        .route("/{id}/run", post(run_task))
        .route("/{id}/steps", get(list_steps))
        .route("/{id}/tool-calls", get(list_tool_calls))
        .route("/{id}/snapshots", get(list_snapshots))
        .route("/{id}/audit", get(list_audit))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    flow_name: String,
    #[serde(default = "empty_object")]
    input: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), TaskRunnerError> {
    let task = state.engine.create_task(&body.flow_name, body.input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Value>, TaskRunnerError> {
    let tasks = state.engine.list_tasks().await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, TaskRunnerError> {
    state.engine.get_task(&id).await.map(Json)
}

async fn advance_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, TaskRunnerError> {
    state.engine.advance(&id).await.map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskRequest {
    max_steps: Option<usize>,
}

async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RunTaskRequest>>,
) -> Result<Json<Task>, TaskRunnerError> {
    let max_steps = body
        .and_then(|Json(req)| req.max_steps)
        .unwrap_or(DEFAULT_RUN_STEPS);
    state.engine.run(&id, max_steps).await.map(Json)
}

async fn list_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, TaskRunnerError> {
    let steps = state.engine.list_steps(&id).await?;
    Ok(Json(serde_json::json!({ "steps": steps })))
}

async fn list_tool_calls(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, TaskRunnerError> {
    let calls = state.engine.list_tool_calls(&id).await?;
    Ok(Json(serde_json::json!({ "toolCalls": calls })))
}

async fn list_snapshots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, TaskRunnerError> {
    let snapshots = state.engine.list_snapshots(&id).await?;
    Ok(Json(serde_json::json!({ "snapshots": snapshots })))
}

async fn list_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, TaskRunnerError> {
    let entries = state.engine.list_audit_entries(Some(&id)).await?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}
