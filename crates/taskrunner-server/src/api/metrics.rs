use axum::{extract::State, routing::get, Json, Router};

use taskrunner_core::engine::MetricsReport;
use taskrunner_core::{AppState, TaskRunnerError};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(metrics))
}

async fn metrics(State(state): State<AppState>) -> Result<Json<MetricsReport>, TaskRunnerError> {
    state.engine.metrics_report().await.map(Json)
}
