//! Statically declared input/output contracts for tools.
//!
//! A schema is a flat list of top-level fields with a JSON kind and a
//! required flag. Payloads must be JSON objects; unknown fields, missing
//! required fields and kind mismatches are all reported.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            // Signed 64-bit only; tools read integers with `as_i64`.
            Self::Integer => value.is_i64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolSchema {
    pub fields: &'static [FieldSpec],
}

impl ToolSchema {
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self { fields }
    }

    /// Check `payload` against the schema, reporting every problem at once.
    pub fn validate(&self, payload: &Value) -> Result<(), String> {
        let object = match payload.as_object() {
            Some(obj) => obj,
            None => return Err(format!("expected a JSON object, got {}", kind_of(payload))),
        };

        let mut problems = Vec::new();
        for field in self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    problems.push(format!("field '{}' is required", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.matches(value) => problems.push(format!(
                    "field '{}' must be {}, got {}",
                    field.name,
                    field.kind.as_str(),
                    kind_of(value)
                )),
                Some(_) => {}
            }
        }
        for key in object.keys() {
            if !self.fields.iter().any(|f| f.name == key) {
                problems.push(format!("unexpected field '{}'", key));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(n) if !n.is_i64() => "integer out of 64-bit signed range",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
