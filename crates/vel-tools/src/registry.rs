// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// A tool schema as handed to the model provider.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {name}")]
    DuplicateName { name: String },
}

/// Central registry holding all available tools.
///
/// Immutable after harness initialisation.  `list()`/`schemas()` preserve
/// registration order so the tool list sent to the provider is stable across
/// turns (a prompt-caching invariant).
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new(), by_name: HashMap::new() }
    }

    /// Register a tool.  Names must be unique within a registry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&idx| self.tools[idx].clone())
    }

    /// All registered tools, in registration order.
    pub fn list(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Produce schemas for all registered tools, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// A new registry containing only the named tools (unknown names are
    /// ignored).  Used to build restricted subagent tool sets.
    pub fn filtered(&self, allowed: &[String]) -> ToolRegistry {
        let mut out = ToolRegistry::new();
        for tool in &self.tools {
            if allowed.iter().any(|n| n == tool.name()) {
                // Names were unique here, so they stay unique in the subset.
                let _ = out.register(tool.clone());
            }
        }
        out
    }

    /// Validate `call.args` against the tool's schema and invoke its handler.
    ///
    /// Unknown names and schema mismatches return error outputs without
    /// touching any handler, so a denied or malformed call can never produce
    /// side effects.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        if let Err(msg) = validate_args(&tool.input_schema(), &call.args) {
            return ToolOutput::err(
                &call.id,
                format!("invalid arguments for {}: {msg}", call.name),
            );
        }
        tool.execute(call).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural validation of a JSON argument object against a JSON Schema
/// fragment: required keys must be present and typed properties must match.
///
/// This is deliberately shallow — full JSON-Schema semantics belong to the
/// provider side; the registry only guards handlers against missing or
/// mistyped inputs.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in obj {
            let Some(prop) = props.get(key) else {
                if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                    return Err(format!("unexpected parameter '{key}'"));
                }
                continue;
            };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "parameter '{key}' must be of type {expected}"
                    ));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{Tool, ToolCall, ToolOutput};

    /// Minimal echo tool for registry tests.
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args["text"]))
        }
    }

    fn registry_with(names: &[&'static str]) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for n in names {
            reg.register(Arc::new(EchoTool { name: n })).unwrap();
        }
        reg
    }

    #[test]
    fn register_and_get() {
        let reg = registry_with(&["echo"]);
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let mut reg = registry_with(&["echo"]);
        let err = reg.register(Arc::new(EchoTool { name: "echo" })).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
        assert_eq!(reg.names().len(), 1);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let reg = registry_with(&["b", "a", "c"]);
        assert_eq!(reg.names(), vec!["b", "a", "c"]);
        let schemas = reg.schemas();
        assert_eq!(schemas[0].name, "b");
        assert_eq!(schemas[2].name, "c");
    }

    #[test]
    fn filtered_keeps_only_allowed() {
        let reg = registry_with(&["a", "b", "c"]);
        let sub = reg.filtered(&["a".to_string(), "c".to_string(), "ghost".to_string()]);
        assert_eq!(sub.names(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn dispatch_known_tool_succeeds() {
        let reg = registry_with(&["echo"]);
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: json!({"text": "hi"}),
        };
        let out = reg.dispatch(&call).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_returns_error() {
        let reg = ToolRegistry::new();
        let call = ToolCall { id: "x".into(), name: "missing".into(), args: json!({}) };
        let out = reg.dispatch(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_missing_required_arg_fails_before_handler() {
        let reg = registry_with(&["echo"]);
        let call = ToolCall { id: "x".into(), name: "echo".into(), args: json!({}) };
        let out = reg.dispatch(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'text'"));
    }

    #[tokio::test]
    async fn dispatch_wrong_type_fails_before_handler() {
        let reg = registry_with(&["echo"]);
        let call = ToolCall {
            id: "x".into(),
            name: "echo".into(),
            args: json!({"text": 42}),
        };
        let out = reg.dispatch(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("must be of type string"));
    }

    // ── validate_args ─────────────────────────────────────────────────────────

    #[test]
    fn validate_accepts_extra_params_by_default() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        assert!(validate_args(&schema, &json!({"a": "x", "b": 1})).is_ok());
    }

    #[test]
    fn validate_rejects_extra_params_when_closed() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        });
        assert!(validate_args(&schema, &json!({"a": "x", "b": 1})).is_err());
    }

    #[test]
    fn validate_rejects_non_object_args() {
        let schema = json!({"type": "object"});
        assert!(validate_args(&schema, &json!([1, 2])).is_err());
    }

    #[test]
    fn validate_integer_accepts_u64_and_i64() {
        let schema = json!({"type": "object", "properties": {"n": {"type": "integer"}}});
        assert!(validate_args(&schema, &json!({"n": 3})).is_ok());
        assert!(validate_args(&schema, &json!({"n": -3})).is_ok());
        assert!(validate_args(&schema, &json!({"n": 3.5})).is_err());
    }
}
