//! Shared fixtures for the core integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use taskrunner_core::config::{RetryConfig, RunnerConfig};
use taskrunner_core::flows::{FlowGraph, InputBinding};
use taskrunner_core::tools::{FieldKind, FieldSpec, Tool, ToolError, ToolSchema};
use taskrunner_core::{AppState, AppStateInner, Database, FlowRegistry, ToolRegistry};

const N_SCHEMA: ToolSchema = ToolSchema::new(&[FieldSpec::required("n", FieldKind::Integer)]);

/// Fails its first `failures` invocations, then doubles `n`.
pub struct FlakyDoubler {
    pub failures: u32,
    pub calls: AtomicU32,
}

impl FlakyDoubler {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for FlakyDoubler {
    fn name(&self) -> &str {
        "double"
    }

    fn input_schema(&self) -> &ToolSchema {
        &N_SCHEMA
    }

    fn output_schema(&self) -> &ToolSchema {
        &N_SCHEMA
    }

    fn invoke(&self, input: &Value) -> Result<Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ToolError::new(format!("upstream unavailable ({})", call + 1)));
        }
        let n = input["n"].as_i64().unwrap_or_default();
        Ok(json!({ "n": n * 2 }))
    }
}

pub fn fast_retry_config() -> RunnerConfig {
    RunnerConfig {
        retry: RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn builtin_state(config: RunnerConfig) -> AppState {
    let db = Database::open_in_memory().expect("open in-memory db");
    Arc::new(AppStateInner::new(db, config))
}

/// Builtin registries plus a one-node `double` flow backed by `tool`.
pub fn doubler_state(tool: Arc<FlakyDoubler>, config: RunnerConfig) -> AppState {
    let db = Database::open_in_memory().expect("open in-memory db");
    let mut tools = ToolRegistry::builtin();
    tools.register(tool);
    let mut flows = FlowRegistry::builtin();
    flows
        .register(
            FlowGraph::linear(
                "double",
                vec![("double", "double", InputBinding::fields(&[("n", "n")]), "doubled")],
            )
            .expect("build double flow"),
            &tools,
        )
        .expect("register double flow");
    Arc::new(AppStateInner::with_registries(db, config, tools, flows))
}

pub fn echo_add_input() -> Value {
    json!({ "text": "hi", "a": 2, "b": 3 })
}
