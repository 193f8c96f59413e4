//! Taskrunner Core: Transport-agnostic task execution for deterministic flows.
//!
//! This crate owns the task state machine and everything it depends on:
//! tool and flow registries, the policy/audit gate, the idempotent tool
//! executor, the per-task lock, and the SQLite persistence layer. It has
//! **no HTTP framework dependency** by default, making it suitable for use in:
//!
//! - HTTP servers (via `taskrunner-server`)
//! - CLI tools (via `taskrunner-cli`)
//! - Embedding directly in other services
//!
//! # Feature Flags
//!
//! - `axum`: Enables `IntoResponse` impl on `TaskRunnerError` for use in axum handlers.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod flows;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod state;
pub mod store;
pub mod tools;
pub mod trace;

// Convenience re-exports
pub use config::RunnerConfig;
pub use db::Database;
pub use engine::StepEngine;
pub use flows::FlowRegistry;
pub use error::TaskRunnerError;
pub use state::{AppState, AppStateInner};
pub use tools::ToolRegistry;
