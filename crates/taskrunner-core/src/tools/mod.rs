//! Tool registry: named, deterministic operations with declared contracts.
//!
//! A tool is a bounded, synchronous function from a JSON object to a JSON
//! object. The registry is assembled once at startup and shared read-only
//! (behind an `Arc`) by the policy engine and the executor.
//!
//! Builtin tools:
//!   1. echo - `{text} → {text}`
//!   2. add  - `{a, b} → {sum}`

pub mod builtin;
pub mod schema;

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use builtin::{AddTool, EchoTool};
pub use schema::{FieldKind, FieldSpec, ToolSchema};

/// Failure reported by a tool implementation. Every failure is retried by
/// the executor until its attempt budget is spent.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Capability implemented by every registered tool.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> &ToolSchema;

    fn output_schema(&self) -> &ToolSchema;

    /// Run the tool. Must be bounded; the executor enforces a timeout.
    fn invoke(&self, input: &Value) -> Result<Value, ToolError>;
}

/// Serializable description of a registered tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
    pub output_schema: ToolSchema,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin `echo` and `add` tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(AddTool));
        registry
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name).cloned())
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: *tool.input_schema(),
                output_schema: *tool.output_schema(),
            })
            .collect()
    }
}
