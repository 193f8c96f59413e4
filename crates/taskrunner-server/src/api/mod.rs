pub mod catalog;
pub mod metrics;
pub mod tasks;

use axum::Router;

use taskrunner_core::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/tasks", tasks::router())
        .nest("/api/metrics", metrics::router())
        .merge(catalog::router())
}
