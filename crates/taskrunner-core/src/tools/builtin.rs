//! Builtin deterministic tools shipped with every registry.

use serde_json::{json, Value};

use super::schema::{FieldKind, FieldSpec, ToolSchema};
use super::{Tool, ToolError};

const TEXT_SCHEMA: ToolSchema = ToolSchema::new(&[FieldSpec::required("text", FieldKind::String)]);

const ADD_INPUT: ToolSchema = ToolSchema::new(&[
    FieldSpec::required("a", FieldKind::Integer),
    FieldSpec::required("b", FieldKind::Integer),
]);

const ADD_OUTPUT: ToolSchema = ToolSchema::new(&[FieldSpec::required("sum", FieldKind::Integer)]);

/// Returns its `text` input unchanged.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input text back"
    }

    fn input_schema(&self) -> &ToolSchema {
        &TEXT_SCHEMA
    }

    fn output_schema(&self) -> &ToolSchema {
        &TEXT_SCHEMA
    }

    fn invoke(&self, input: &Value) -> Result<Value, ToolError> {
        let text = input
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("missing string field 'text'"))?;
        Ok(json!({ "text": text }))
    }
}

/// Adds two integers; overflow is an error rather than a wrap.
pub struct AddTool;

impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two integers"
    }

    fn input_schema(&self) -> &ToolSchema {
        &ADD_INPUT
    }

    fn output_schema(&self) -> &ToolSchema {
        &ADD_OUTPUT
    }

    fn invoke(&self, input: &Value) -> Result<Value, ToolError> {
        let a = input
            .get("a")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::new("missing integer field 'a'"))?;
        let b = input
            .get("b")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::new("missing integer field 'b'"))?;
        let sum = a
            .checked_add(b)
            .ok_or_else(|| ToolError::new(format!("integer overflow adding {} and {}", a, b)))?;
        Ok(json!({ "sum": sum }))
    }
}
