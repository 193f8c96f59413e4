//! Flow and tool catalog, plus the input dry run.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use taskrunner_core::{AppState, TaskRunnerError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/flows", get(list_flows))
        .route("/api/tools", get(list_tools))
        .route("/api/validate", post(validate))
}

async fn list_flows(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({ "flows": state.flows.descriptors() }))
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "tools": state.tools.descriptors(),
        "allowlist": state.engine.policy().allowlist(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest {
    flow_name: String,
    #[serde(default)]
    input: Value,
}

async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<Value>, TaskRunnerError> {
    state
        .engine
        .validate_input(&body.flow_name, &body.input)
        .await?;
    Ok(Json(serde_json::json!({ "valid": true })))
}
