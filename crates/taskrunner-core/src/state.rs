//! Shared application state for the server and CLI.

use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::db::Database;
use crate::engine::StepEngine;
use crate::flows::FlowRegistry;
use crate::metrics::Metrics;
use crate::tools::ToolRegistry;

/// Everything a request handler or CLI command needs.
pub struct AppStateInner {
    pub db: Database,
    pub config: RunnerConfig,
    pub tools: Arc<ToolRegistry>,
    pub flows: Arc<FlowRegistry>,
    pub metrics: Arc<Metrics>,
    pub engine: StepEngine,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// State with the builtin tools and flows.
    pub fn new(db: Database, config: RunnerConfig) -> Self {
        Self::with_registries(db, config, ToolRegistry::builtin(), FlowRegistry::builtin())
    }

    pub fn with_registries(
        db: Database,
        config: RunnerConfig,
        tools: ToolRegistry,
        flows: FlowRegistry,
    ) -> Self {
        let tools = Arc::new(tools);
        let flows = Arc::new(flows);
        let metrics = Arc::new(Metrics::new());
        let engine = StepEngine::new(
            db.clone(),
            &config,
            tools.clone(),
            flows.clone(),
            metrics.clone(),
        );
        Self {
            db,
            config,
            tools,
            flows,
            metrics,
            engine,
        }
    }
}
