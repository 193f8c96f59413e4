//! Taskrunner Server: HTTP adapter for the task execution core.
//!
//! Exposes task creation, advancing, inspection, the flow/tool catalog and
//! metrics over a small JSON API built on axum. All behaviour lives in
//! `taskrunner-core`; handlers only translate requests and errors.

pub mod api;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use taskrunner_core::{AppState, AppStateInner, Database, RunnerConfig};

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Optional YAML file with runner settings.
    pub config_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3220,
            db_path: "taskrunner.db".to_string(),
            config_path: None,
        }
    }
}

/// Open the database and build the shared state with builtin registries.
pub fn create_app_state(db_path: &str, config: RunnerConfig) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(AppStateInner::new(db, config)))
}

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();
}

/// Start the server in the background.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    init_tracing("taskrunner_core=info,taskrunner_server=info,tower_http=info");

    tracing::info!(
        "Starting taskrunner server on {}:{}",
        config.host,
        config.port
    );

    let runner_config = RunnerConfig::load(config.config_path.as_deref().map(Path::new))
        .map_err(|e| e.to_string())?;
    let state = create_app_state(&config.db_path, runner_config)?;

    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("taskrunner server listening on {}", local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

/// The complete application router, without binding a socket.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "taskrunner-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
