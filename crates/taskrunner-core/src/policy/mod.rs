//! Policy engine: gatekeeper run before every tool invocation.
//!
//! Checks, in order: tool allowlist, input schema, serialized input size,
//! and the per-task step budget. The first failing check wins. Callers turn
//! a [`PolicyViolation`] into exactly one audit entry.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PolicyConfig;
use crate::error::TaskRunnerError;
use crate::flows::FlowGraph;
use crate::models::{AuditEntry, Task, ViolationKind};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyLimits {
    pub max_input_bytes: usize,
    pub max_steps: i64,
    pub tool_timeout: Duration,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

impl From<&PolicyConfig> for PolicyLimits {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_input_bytes: config.max_input_bytes,
            max_steps: config.max_steps,
            tool_timeout: config.tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub detail: String,
}

impl PolicyViolation {
    pub fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Audit record for this rejection.
    pub fn audit_entry(
        &self,
        task_id: Option<&str>,
        step_index: Option<i64>,
        tool_name: Option<&str>,
        payload: &Value,
    ) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.map(str::to_string),
            step_index,
            tool_name: tool_name.map(str::to_string),
            violation: self.kind,
            detail: self.detail.clone(),
            payload: payload.clone(),
            created_at: Utc::now(),
        }
    }
}

impl From<PolicyViolation> for TaskRunnerError {
    fn from(v: PolicyViolation) -> Self {
        match v.kind {
            ViolationKind::UnknownFlow => TaskRunnerError::UnknownFlow(v.detail),
            ViolationKind::UnknownTool => TaskRunnerError::UnknownTool(v.detail),
            ViolationKind::SchemaViolation => TaskRunnerError::SchemaViolation(v.detail),
            ViolationKind::PayloadTooLarge => TaskRunnerError::PayloadTooLarge(v.detail),
            ViolationKind::StepLimitExceeded => TaskRunnerError::StepLimitExceeded(v.detail),
        }
    }
}

pub struct PolicyEngine {
    limits: PolicyLimits,
    allowlist: BTreeSet<String>,
    tools: Arc<ToolRegistry>,
}

impl PolicyEngine {
    /// Allowlist defaults to every registered tool. Configured names that
    /// are not registered are dropped with a warning.
    pub fn new(config: &PolicyConfig, tools: Arc<ToolRegistry>) -> Self {
        let allowlist = match &config.allowed_tools {
            Some(names) => names
                .iter()
                .filter(|name| {
                    let known = tools.contains(name);
                    if !known {
                        tracing::warn!(tool = %name, "allowlisted tool is not registered");
                    }
                    known
                })
                .cloned()
                .collect(),
            None => tools.names().into_iter().collect(),
        };
        Self {
            limits: PolicyLimits::from(config),
            allowlist,
            tools,
        }
    }

    pub fn limits(&self) -> &PolicyLimits {
        &self.limits
    }

    /// Sorted names of the tools that may run.
    pub fn allowlist(&self) -> Vec<String> {
        self.allowlist.iter().cloned().collect()
    }

    pub fn check(&self, tool_name: &str, input: &Value, task: &Task) -> Result<(), PolicyViolation> {
        self.check_tool_input(tool_name, input)?;
        if task.step_counter >= self.limits.max_steps {
            return Err(PolicyViolation::new(
                ViolationKind::StepLimitExceeded,
                format!(
                    "task {} has executed {} steps; limit is {}",
                    task.id, task.step_counter, self.limits.max_steps
                ),
            ));
        }
        Ok(())
    }

    /// Allowlist, schema and size checks for one tool input.
    pub fn check_tool_input(&self, tool_name: &str, input: &Value) -> Result<(), PolicyViolation> {
        let tool = match self.tools.get(tool_name) {
            Some(tool) if self.allowlist.contains(tool_name) => tool,
            _ => {
                return Err(PolicyViolation::new(
                    ViolationKind::UnknownTool,
                    format!(
                        "tool '{}' is not allowlisted. Allowed tools: {}",
                        tool_name,
                        self.allowlist().join(", ")
                    ),
                ))
            }
        };

        tool.input_schema().validate(input).map_err(|e| {
            PolicyViolation::new(
                ViolationKind::SchemaViolation,
                format!("tool '{}' input validation failed: {}", tool_name, e),
            )
        })?;

        self.check_size(input)
    }

    /// A task's initial input must be an object within the size limit.
    pub fn check_initial_input(&self, input: &Value) -> Result<(), PolicyViolation> {
        if !input.is_object() {
            return Err(PolicyViolation::new(
                ViolationKind::SchemaViolation,
                "task input must be a JSON object",
            ));
        }
        self.check_size(input)
    }

    /// Dry run of a flow over `input` without creating a task.
    ///
    /// Nodes whose inputs depend on state produced by earlier nodes cannot
    /// be resolved ahead of time and are skipped.
    pub fn validate_flow_input(&self, flow: &FlowGraph, input: &Value) -> Result<(), PolicyViolation> {
        self.check_initial_input(input)?;
        let state = input.as_object().cloned().unwrap_or_default();
        let produced: BTreeSet<&str> = flow.nodes.values().map(|n| n.output_key.as_str()).collect();

        for node in flow.walk() {
            if node
                .input
                .sources()
                .any(|key| produced.contains(key) && !state.contains_key(key))
            {
                continue;
            }
            let tool_input = node.input.resolve(&state);
            self.check_tool_input(&node.tool, &tool_input)?;
        }
        Ok(())
    }

    fn check_size(&self, input: &Value) -> Result<(), PolicyViolation> {
        let size = serde_json::to_vec(input).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_input_bytes {
            return Err(PolicyViolation::new(
                ViolationKind::PayloadTooLarge,
                format!(
                    "input is {} bytes; limit is {}",
                    size, self.limits.max_input_bytes
                ),
            ));
        }
        Ok(())
    }
}
