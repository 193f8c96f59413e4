//! Flow registry: fixed, pre-registered graphs of tool invocations.
//!
//! A flow is an immutable adjacency structure: each node names one tool, how
//! to project the task's accumulated state into that tool's input, the state
//! key its output is stored under, and how to pick the successor. Topology
//! is fixed at registration; nothing is loaded from user files at runtime.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::TaskRunnerError;
use crate::tools::ToolRegistry;

/// Successor chosen after a node's tool succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextNode {
    Node(String),
    Complete,
    Fail,
}

/// Edge out of a node.
#[derive(Clone)]
pub enum Transition {
    Goto(String),
    /// Task becomes COMPLETED.
    End,
    /// Task becomes FAILED.
    Fail,
    /// Pure, output-dependent successor selection.
    Branch(fn(&Value) -> NextNode),
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Goto(node) => f.debug_tuple("Goto").field(node).finish(),
            Self::End => f.write_str("End"),
            Self::Fail => f.write_str("Fail"),
            Self::Branch(_) => f.write_str("Branch(..)"),
        }
    }
}

/// How a node's tool input is derived from the accumulated state.
#[derive(Debug, Clone)]
pub enum InputBinding {
    /// `(target field, state key)` pairs. Missing state keys are omitted so
    /// the schema check reports them.
    Fields(Vec<(String, String)>),
}

impl InputBinding {
    pub fn fields(pairs: &[(&str, &str)]) -> Self {
        Self::Fields(
            pairs
                .iter()
                .map(|(target, source)| (target.to_string(), source.to_string()))
                .collect(),
        )
    }

    /// Project `state` into a tool input object.
    pub fn resolve(&self, state: &Map<String, Value>) -> Value {
        match self {
            Self::Fields(pairs) => {
                let mut input = Map::new();
                for (target, source) in pairs {
                    if let Some(value) = state.get(source) {
                        input.insert(target.clone(), value.clone());
                    }
                }
                Value::Object(input)
            }
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::Fields(pairs) => pairs.iter().map(|(_, source)| source.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowNode {
    pub id: String,
    pub tool: String,
    pub input: InputBinding,
    pub output_key: String,
    pub transition: Transition,
}

impl FlowNode {
    pub fn new(
        id: &str,
        tool: &str,
        input: InputBinding,
        output_key: &str,
        transition: Transition,
    ) -> Self {
        Self {
            id: id.to_string(),
            tool: tool.to_string(),
            input,
            output_key: output_key.to_string(),
            transition,
        }
    }

    pub fn next_node(&self, output: &Value) -> NextNode {
        match &self.transition {
            Transition::Goto(node) => NextNode::Node(node.clone()),
            Transition::End => NextNode::Complete,
            Transition::Fail => NextNode::Fail,
            Transition::Branch(select) => select(output),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow '{flow}': entry node '{entry}' does not exist")]
    MissingEntry { flow: String, entry: String },

    #[error("flow '{flow}': node '{node}' goes to unknown node '{target}'")]
    DanglingEdge {
        flow: String,
        node: String,
        target: String,
    },

    #[error("flow '{flow}': node '{node}' uses unregistered tool '{tool}'")]
    UnregisteredTool {
        flow: String,
        node: String,
        tool: String,
    },

    #[error("flow '{0}' is already registered")]
    Duplicate(String),

    #[error("flow '{0}' has no nodes")]
    Empty(String),

    #[error("flow '{flow}': node id '{node}' is used twice")]
    DuplicateNode { flow: String, node: String },
}

#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub name: String,
    pub entry: String,
    pub nodes: BTreeMap<String, FlowNode>,
}

impl FlowGraph {
    /// Build a graph, checking that the entry and every `Goto` target exist.
    pub fn new(name: &str, entry: &str, nodes: Vec<FlowNode>) -> Result<Self, FlowError> {
        let nodes: BTreeMap<String, FlowNode> =
            nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        if !nodes.contains_key(entry) {
            return Err(FlowError::MissingEntry {
                flow: name.to_string(),
                entry: entry.to_string(),
            });
        }
        for node in nodes.values() {
            if let Transition::Goto(target) = &node.transition {
                if !nodes.contains_key(target) {
                    return Err(FlowError::DanglingEdge {
                        flow: name.to_string(),
                        node: node.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            entry: entry.to_string(),
            nodes,
        })
    }

    /// Linear chain of `(node id, tool, input binding, output key)`; the
    /// last node ends the flow.
    pub fn linear(
        name: &str,
        chain: Vec<(&str, &str, InputBinding, &str)>,
    ) -> Result<Self, FlowError> {
        let ids: Vec<String> = chain.iter().map(|(id, ..)| id.to_string()).collect();
        let entry = ids
            .first()
            .cloned()
            .ok_or_else(|| FlowError::Empty(name.to_string()))?;
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(FlowError::DuplicateNode {
                    flow: name.to_string(),
                    node: id.clone(),
                });
            }
        }
        let nodes = chain
            .into_iter()
            .enumerate()
            .map(|(i, (id, tool, input, output_key))| {
                let transition = match ids.get(i + 1) {
                    Some(next) => Transition::Goto(next.clone()),
                    None => Transition::End,
                };
                FlowNode::new(id, tool, input, output_key, transition)
            })
            .collect();
        Self::new(name, &entry, nodes)
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    /// Nodes in execution order for linear flows, starting at the entry.
    /// Branching nodes end the walk.
    pub fn walk(&self) -> Vec<&FlowNode> {
        let mut ordered = Vec::new();
        let mut cursor = self.nodes.get(&self.entry);
        while let Some(node) = cursor {
            if ordered.iter().any(|n: &&FlowNode| n.id == node.id) {
                break;
            }
            ordered.push(node);
            cursor = match &node.transition {
                Transition::Goto(next) => self.nodes.get(next),
                _ => None,
            };
        }
        ordered
    }

    pub fn describe(&self) -> FlowDescriptor {
        FlowDescriptor {
            name: self.name.clone(),
            entry: self.entry.clone(),
            nodes: self
                .walk()
                .into_iter()
                .map(|n| FlowNodeDescriptor {
                    id: n.id.clone(),
                    tool: n.tool.clone(),
                    output_key: n.output_key.clone(),
                    next: match &n.transition {
                        Transition::Goto(next) => next.clone(),
                        Transition::End => "COMPLETE".to_string(),
                        Transition::Fail => "FAIL".to_string(),
                        Transition::Branch(_) => "BRANCH".to_string(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDescriptor {
    pub name: String,
    pub entry: String,
    pub nodes: Vec<FlowNodeDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNodeDescriptor {
    pub id: String,
    pub tool: String,
    pub output_key: String,
    pub next: String,
}

/// Read-only after startup; shared behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Arc<FlowGraph>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `echo_add`, `add_echo` and `demo` (same shape as `echo_add`).
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for graph in [
            echo_then_add("echo_add"),
            echo_then_add("demo"),
            add_then_echo("add_echo"),
        ] {
            match graph {
                Ok(graph) => {
                    registry.flows.insert(graph.name.clone(), Arc::new(graph));
                }
                Err(e) => tracing::error!("skipping builtin flow: {}", e),
            }
        }
        registry
    }

    /// Register a graph whose tools must all exist in `tools`.
    pub fn register(&mut self, graph: FlowGraph, tools: &ToolRegistry) -> Result<(), FlowError> {
        if self.flows.contains_key(&graph.name) {
            return Err(FlowError::Duplicate(graph.name));
        }
        for node in graph.nodes.values() {
            if !tools.contains(&node.tool) {
                return Err(FlowError::UnregisteredTool {
                    flow: graph.name.clone(),
                    node: node.id.clone(),
                    tool: node.tool.clone(),
                });
            }
        }
        tracing::debug!(flow = %graph.name, nodes = graph.nodes.len(), "flow registered");
        self.flows.insert(graph.name.clone(), Arc::new(graph));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<FlowGraph>, TaskRunnerError> {
        self.flows.get(name).cloned().ok_or_else(|| {
            TaskRunnerError::UnknownFlow(format!(
                "'{}'. Available flows: {}",
                name,
                self.names().join(", ")
            ))
        })
    }

    /// Registered flow names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.flows.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<FlowDescriptor> {
        self.flows.values().map(|f| f.describe()).collect()
    }
}

fn echo_node() -> InputBinding {
    InputBinding::fields(&[("text", "text")])
}

fn add_node() -> InputBinding {
    InputBinding::fields(&[("a", "a"), ("b", "b")])
}

fn echo_then_add(name: &str) -> Result<FlowGraph, FlowError> {
    FlowGraph::linear(
        name,
        vec![
            ("echo", "echo", echo_node(), "echo_result"),
            ("add", "add", add_node(), "add_result"),
        ],
    )
}

fn add_then_echo(name: &str) -> Result<FlowGraph, FlowError> {
    FlowGraph::linear(
        name,
        vec![
            ("add", "add", add_node(), "add_result"),
            ("echo", "echo", echo_node(), "echo_result"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_flows() {
        let registry = FlowRegistry::builtin();
        assert_eq!(registry.names(), vec!["add_echo", "demo", "echo_add"]);

        let flow = registry.lookup("echo_add").unwrap();
        assert_eq!(flow.entry, "echo");
        let order: Vec<&str> = flow.walk().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["echo", "add"]);
        assert_eq!(flow.node("add").unwrap().output_key, "add_result");
    }

    #[test]
    fn test_lookup_unknown_flow_lists_available() {
        let err = FlowRegistry::builtin().lookup("nope").unwrap_err();
        assert_eq!(err.kind(), "UNKNOWN_FLOW");
        assert!(err.to_string().contains("echo_add"));
    }

    #[test]
    fn test_input_binding_omits_missing_keys() {
        let mut state = Map::new();
        state.insert("a".into(), json!(2));
        state.insert("text".into(), json!("hi"));
        assert_eq!(add_node().resolve(&state), json!({"a": 2}));
        assert_eq!(echo_node().resolve(&state), json!({"text": "hi"}));
    }

    #[test]
    fn test_graph_validation() {
        let dangling = FlowGraph::new(
            "broken",
            "a",
            vec![FlowNode::new(
                "a",
                "echo",
                echo_node(),
                "out",
                Transition::Goto("b".into()),
            )],
        );
        assert!(matches!(dangling, Err(FlowError::DanglingEdge { .. })));

        let missing_entry = FlowGraph::new("broken", "zzz", vec![]);
        assert!(matches!(missing_entry, Err(FlowError::MissingEntry { .. })));
    }

    #[test]
    fn test_linear_rejects_empty_and_repeated_nodes() {
        let empty = FlowGraph::linear("nothing", vec![]);
        assert!(matches!(empty, Err(FlowError::Empty(name)) if name == "nothing"));

        let repeated = FlowGraph::linear(
            "twice",
            vec![
                ("echo", "echo", echo_node(), "first"),
                ("echo", "echo", echo_node(), "second"),
            ],
        );
        assert!(matches!(repeated, Err(FlowError::DuplicateNode { node, .. }) if node == "echo"));

        let chain = echo_then_add("chain").unwrap();
        assert_eq!(chain.entry, "echo");
        assert!(matches!(chain.node("echo").unwrap().transition, Transition::Goto(ref n) if n == "add"));
        assert!(matches!(chain.node("add").unwrap().transition, Transition::End));
    }

    #[test]
    fn test_register_checks_tools_and_duplicates() {
        let tools = ToolRegistry::builtin();
        let mut registry = FlowRegistry::builtin();

        let bad = FlowGraph::linear(
            "shell_flow",
            vec![("run", "shell", InputBinding::fields(&[]), "out")],
        )
        .unwrap();
        assert!(matches!(
            registry.register(bad, &tools),
            Err(FlowError::UnregisteredTool { .. })
        ));

        let dup = echo_then_add("echo_add").unwrap();
        assert!(matches!(
            registry.register(dup, &tools),
            Err(FlowError::Duplicate(_))
        ));
    }

    #[test]
    fn test_branch_transition_selects_successor() {
        fn by_sum(output: &Value) -> NextNode {
            match output.get("sum").and_then(Value::as_i64) {
                Some(n) if n >= 0 => NextNode::Complete,
                _ => NextNode::Fail,
            }
        }
        let node = FlowNode::new("add", "add", add_node(), "add_result", Transition::Branch(by_sum));
        assert_eq!(node.next_node(&json!({"sum": 3})), NextNode::Complete);
        assert_eq!(node.next_node(&json!({"sum": -3})), NextNode::Fail);
    }
}
