//! Higher-order tools built from other tools.
//!
//! Composers take existing [`Tool`]s and return new ones: sequential
//! pipelines, predicate routing, namespacing, retry wrappers, and memoized
//! caches.  The wrapped tools keep their executors; only the surface
//! changes.

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::tool_registry::{stringify_result, Tool};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Pipe `tools` in order: each tool's output becomes the next tool's
/// `input` parameter (JSON-stringified when it is not already a string).
///
/// The composed tool exposes the first tool's parameter schema. At least one
/// tool is required.
pub fn compose_tool(tools: Vec<Tool>, name: impl Into<String>, description: impl Into<String>) -> Result<Tool> {
    if tools.is_empty() {
        return Err(AgentError::config("compose_tool requires at least one tool"));
    }
    let parameters = tools[0].parameters.clone();
    let tools = Arc::new(tools);

    Ok(Tool::new(name, description, parameters, move |params| {
        let tools = tools.clone();
        async move {
            let mut value = tools[0].call(params).await?;
            for tool in &tools[1..] {
                let input = stringify_result(&value);
                value = tool.call(json!({ "input": input })).await?;
            }
            Ok(value)
        }
    }))
}

/// Route to `when_true` or `when_false` based on a predicate over the call
/// parameters.
///
/// The parameter schema is the shallow merge of both tools' schemas and the
/// union of their `required` lists, so either branch's arguments validate.
pub fn conditional_tool<P>(predicate: P, when_true: Tool, when_false: Tool) -> Tool
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    let name = format!("{}_or_{}", when_true.name, when_false.name);
    let description = format!(
        "Runs {} when the condition holds, otherwise {}.",
        when_true.name, when_false.name
    );
    let parameters = merge_schemas(&when_true.parameters, &when_false.parameters);

    Tool::new(name, description, parameters, move |params| {
        let chosen = if predicate(&params) {
            when_true.clone()
        } else {
            when_false.clone()
        };
        async move { chosen.call(params).await }
    })
}

fn merge_schemas(a: &Value, b: &Value) -> Value {
    let mut merged = Map::new();
    merged.insert("type".to_string(), json!("object"));

    let mut properties = Map::new();
    for schema in [a, b] {
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, value) in props {
                properties.insert(key.clone(), value.clone());
            }
        }
    }
    merged.insert("properties".to_string(), Value::Object(properties));

    let mut required: Vec<String> = Vec::new();
    for schema in [a, b] {
        if let Some(names) = schema.get("required").and_then(|r| r.as_array()) {
            for name in names.iter().filter_map(|n| n.as_str()) {
                if !required.iter().any(|r| r == name) {
                    required.push(name.to_string());
                }
            }
        }
    }
    if !required.is_empty() {
        merged.insert("required".to_string(), json!(required));
    }
    Value::Object(merged)
}

/// Namespace a set of tools: each is renamed `<group>_<name>` and its
/// description prefixed with `[<description>] `. Parameters and executors
/// are unchanged.
pub fn tool_group(tools: Vec<Tool>, group: &str, description: &str) -> Vec<Tool> {
    tools
        .into_iter()
        .map(|tool| {
            let executor = tool.executor();
            Tool::from_executor(
                format!("{}_{}", group, tool.name),
                format!("[{}] {}", description, tool.description),
                tool.parameters.clone(),
                executor,
            )
        })
        .collect()
}

/// Re-run a failing tool up to `max_retries` extra times; the final error is
/// re-raised unchanged.
pub fn retry_tool(tool: Tool, max_retries: u32) -> Tool {
    let name = tool.name.clone();
    let description = tool.description.clone();
    let parameters = tool.parameters.clone();

    Tool::new(name, description, parameters, move |params| {
        let tool = tool.clone();
        async move {
            let mut last_error: Option<AgentError> = None;
            for _ in 0..=max_retries {
                match tool.call(params.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(error) => last_error = Some(error),
                }
            }
            Err(last_error.unwrap_or_else(|| AgentError::other("retry produced no error")))
        }
    })
}

/// Options for [`cache_tool`].
#[derive(Clone, Default)]
pub struct CacheOptions {
    /// Entries older than this are re-executed. `None` caches forever.
    pub ttl: Option<Duration>,
    /// Custom cache key derivation; defaults to the JSON-stringified
    /// arguments.
    pub key_fn: Option<Arc<dyn Fn(&Value) -> String + Send + Sync>>,
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }
}

/// Memoize a tool by its arguments. Cache hits bypass the executor
/// entirely; entries expire after the optional TTL.
pub fn cache_tool(tool: Tool, options: CacheOptions) -> Tool {
    let name = tool.name.clone();
    let description = tool.description.clone();
    let parameters = tool.parameters.clone();
    let cache: Arc<Mutex<HashMap<String, (Instant, Value)>>> = Arc::new(Mutex::new(HashMap::new()));

    Tool::new(name, description, parameters, move |params| {
        let tool = tool.clone();
        let cache = cache.clone();
        let options = options.clone();
        async move {
            let key = match &options.key_fn {
                Some(key_fn) => key_fn(&params),
                None => params.to_string(),
            };

            if let Some((stored_at, value)) = cache.lock().unwrap().get(&key) {
                let fresh = options
                    .ttl
                    .map(|ttl| stored_at.elapsed() < ttl)
                    .unwrap_or(true);
                if fresh {
                    return Ok(value.clone());
                }
            }

            let value = tool.call(params).await?;
            cache
                .lock()
                .unwrap()
                .insert(key, (Instant::now(), value.clone()));
            Ok(value)
        }
    })
}
