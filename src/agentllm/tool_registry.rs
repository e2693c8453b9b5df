//! Tool definitions, the registry, and timed execution.
//!
//! A [`Tool`] bundles a name, a description, a JSON-schema parameter
//! declaration, and an async executor.  Agents hold their tools in a
//! [`ToolRegistry`] which enforces the unique-name invariant and preserves
//! registration order.  [`execute_tool`] runs a tool with argument
//! validation left to the caller, a timeout, and error capture: tool
//! failures become data, never panics.
//!
//! # Example
//!
//! ```rust
//! use agentllm::tool_registry::{Tool, ToolRegistry};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> agentllm::error::Result<()> {
//! let greet = Tool::new(
//!     "greet",
//!     "Greets someone by name.",
//!     json!({
//!         "type": "object",
//!         "properties": {"name": {"type": "string"}},
//!         "required": ["name"]
//!     }),
//!     |params| async move {
//!         let name = params["name"].as_str().unwrap_or("stranger").to_string();
//!         Ok(json!(format!("Hello {}", name)))
//!     },
//! );
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(greet)?;
//! assert!(registry.has("greet"));
//! # Ok(())
//! # }
//! ```

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::ToolSchema;
use crate::agentllm::schema::{validate_schema, SchemaValidation};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on a single tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed async tool body.
pub type ToolExecutor = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A callable tool exposed to models.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the accepted parameters.
    pub parameters: Value,
    executor: ToolExecutor,
}

impl Tool {
    /// Build a tool from an async closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            executor: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// Build a tool around an already-boxed executor. Used by the composers
    /// to wrap other tools without another closure layer.
    pub fn from_executor(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            executor,
        }
    }

    /// Invoke the executor directly, without timeout or error capture.
    pub async fn call(&self, args: Value) -> Result<Value> {
        (self.executor)(args).await
    }

    pub(crate) fn executor(&self) -> ToolExecutor {
        self.executor.clone()
    }

    /// The wire-facing schema forwarded to providers.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Ordered collection of uniquely named tools.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names are a configuration error.
    pub fn register(&mut self, tool: Tool) -> Result<()> {
        if self.has(&tool.name) {
            return Err(AgentError::config(format!(
                "tool \"{}\" is already registered",
                tool.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Look up a tool; missing names are a configuration error.
    pub fn get(&self, name: &str) -> Result<&Tool> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| AgentError::config(format!("tool \"{}\" is not registered", name)))
    }

    /// Tool names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// All tools in registration order.
    pub fn all(&self) -> &[Tool] {
        &self.tools
    }

    /// Wire schemas for every registered tool, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Validate call arguments against a tool's parameter schema.
pub fn validate_parameters(args: &Value, schema: &Value) -> SchemaValidation {
    validate_schema(args, schema)
}

/// Outcome of one timed tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    /// String result fed back to the model. Non-string tool outputs are
    /// JSON-stringified. Empty when `error` is set.
    pub result: String,
    pub error: Option<String>,
}

/// Render a tool's JSON output as the string fed back to the model.
pub fn stringify_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run a tool with a timeout, capturing failures as data.
pub async fn execute_tool(tool: &Tool, args: Value, timeout: Duration) -> ToolExecution {
    match tokio::time::timeout(timeout, tool.call(args)).await {
        Err(_) => ToolExecution {
            result: String::new(),
            error: Some(format!(
                "tool \"{}\" timed out after {}ms",
                tool.name,
                timeout.as_millis()
            )),
        },
        Ok(Err(error)) => ToolExecution {
            result: String::new(),
            error: Some(error.to_string()),
        },
        Ok(Ok(value)) => ToolExecution {
            result: stringify_result(&value),
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool(name: &str) -> Tool {
        Tool::new(
            name,
            "Echoes its input.",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |params| async move { Ok(params["text"].clone()) },
        )
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();
        let err = registry.register(echo_tool("echo")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_registry_preserves_insertion_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("c")).unwrap();
        registry.register(echo_tool("a")).unwrap();
        registry.register(echo_tool("b")).unwrap();
        assert_eq!(registry.list(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_registry_get_missing_is_error() {
        let registry = ToolRegistry::new();
        assert!(registry.get("nope").is_err());
        assert!(!registry.has("nope"));
    }

    #[tokio::test]
    async fn test_execute_stringifies_non_string_results() {
        let tool = Tool::new("nums", "Returns numbers.", json!({"type": "object"}), |_| async {
            Ok(json!({"answer": 42}))
        });
        let execution = execute_tool(&tool, json!({}), DEFAULT_TOOL_TIMEOUT).await;
        assert!(execution.error.is_none());
        assert_eq!(execution.result, r#"{"answer":42}"#);
    }

    #[tokio::test]
    async fn test_execute_passes_strings_through() {
        let execution = execute_tool(
            &echo_tool("echo"),
            json!({"text": "plain"}),
            DEFAULT_TOOL_TIMEOUT,
        )
        .await;
        assert_eq!(execution.result, "plain");
    }

    #[tokio::test]
    async fn test_execute_captures_errors() {
        let tool = Tool::new("bad", "Always fails.", json!({"type": "object"}), |_| async {
            Err(AgentError::other("exploded"))
        });
        let execution = execute_tool(&tool, json!({}), DEFAULT_TOOL_TIMEOUT).await;
        assert_eq!(execution.result, "");
        assert!(execution.error.unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let tool = Tool::new("slow", "Sleeps forever.", json!({"type": "object"}), |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!("never"))
        });
        let execution = execute_tool(&tool, json!({}), Duration::from_millis(20)).await;
        let error = execution.error.unwrap();
        assert!(error.contains("timed out after 20ms"), "{}", error);
    }

    #[test]
    fn test_validate_parameters() {
        let schema = json!({
            "type": "object",
            "properties": {"n": {"type": "integer"}},
            "required": ["n"]
        });
        assert!(validate_parameters(&json!({"n": 3}), &schema).valid);
        assert!(!validate_parameters(&json!({}), &schema).valid);
    }
}
