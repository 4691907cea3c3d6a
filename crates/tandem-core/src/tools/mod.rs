//! Tool registry and executor system

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::providers::ToolDefinition;

pub mod calendar;

/// Read-only view of the session a tool runs in
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub state: Map<String, Value>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, state: Map<String, Value>) -> Self {
        Self {
            session_id: session_id.into(),
            state,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(|v| v.as_str())
    }
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Registry of available tools
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<Arc<str>, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool handler
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name: Arc<str> = Arc::from(handler.name());
        debug!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for the model, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|handler| ToolDefinition {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                input_schema: handler.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn execute(&self, tool_name: &str, input: Value, ctx: &ToolContext) -> Result<Value> {
        debug!("Executing tool: {} with input: {:?}", tool_name, input);

        let handler = self
            .tools
            .get(tool_name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", tool_name))?;

        match handler.execute(input, ctx).await {
            Ok(result) => {
                debug!("Tool {} succeeded", tool_name);
                Ok(result)
            }
            Err(e) => {
                warn!("Tool {} failed: {:#}", tool_name, e);
                Err(e)
            }
        }
    }

    /// Execute a tool and shape the outcome as a function response object.
    /// Failures are reported to the model as `{"error": "..."}`.
    pub async fn call(&self, tool_name: &str, input: Value, ctx: &ToolContext) -> Value {
        match self.execute(tool_name, input, ctx).await {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) => serde_json::json!({ "result": other }),
            Err(e) => serde_json::json!({ "error": format!("{:#}", e) }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper function to create a JSON schema for tool input
pub fn json_schema(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoStateTool;

    #[async_trait]
    impl ToolHandler for EchoStateTool {
        fn name(&self) -> &str {
            "echo_state"
        }

        fn description(&self) -> &str {
            "Echo a state value"
        }

        fn input_schema(&self) -> Value {
            json_schema(
                serde_json::json!({
                    "key": {
                        "type": "string",
                        "description": "State key to read"
                    }
                }),
                vec!["key"],
            )
        }

        async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
            let key = input
                .get("key")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("Missing 'key' parameter"))?;
            Ok(ctx.state.get(key).cloned().unwrap_or(Value::Null))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn input_schema(&self) -> Value {
            json_schema(serde_json::json!({}), vec![])
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<Value> {
            Err(anyhow!("intentional failure"))
        }
    }

    fn ctx_with(key: &str, value: &str) -> ToolContext {
        let mut state = Map::new();
        state.insert(key.to_string(), Value::String(value.to_string()));
        ToolContext::new("s1", state)
    }

    #[tokio::test]
    async fn test_tool_reads_context_state() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoStateTool));

        let ctx = ctx_with("color", "blue");
        let result = registry
            .execute("echo_state", serde_json::json!({"key": "color"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result, "blue");
    }

    #[tokio::test]
    async fn test_call_wraps_non_object_results() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoStateTool));
        let ctx = ctx_with("color", "blue");
        let response = registry
            .call("echo_state", serde_json::json!({"key": "color"}), &ctx)
            .await;
        assert_eq!(response, serde_json::json!({"result": "blue"}));
    }

    #[tokio::test]
    async fn test_call_reports_failure_as_error_object() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let response = registry
            .call("failing", serde_json::json!({}), &ToolContext::default())
            .await;
        assert!(
            response["error"]
                .as_str()
                .unwrap()
                .contains("intentional failure")
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("nonexistent", serde_json::json!({}), &ToolContext::default())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(EchoStateTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "echo_state");
        assert_eq!(defs[1].name, "failing");
        assert!(defs[0].input_schema.get("properties").is_some());
    }

    #[test]
    fn test_registry_overwrite() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(FailingTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("failing").is_some());
    }

    #[test]
    fn test_json_schema_helper() {
        let schema = json_schema(
            serde_json::json!({
                "name": {"type": "string"},
                "age": {"type": "number"}
            }),
            vec!["name"],
        );
        assert_eq!(schema["type"], "object");
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "name");
    }
}
