//! Provider-agnostic data model and the [`Model`] trait.
//!
//! Applications interact with providers through the [`Model`] trait and the
//! lightweight data types defined here.  The trait abstracts over concrete
//! vendor adapters while the supporting structs describe chat messages, tool
//! calls, and token accounting in one normalized shape.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use agentllm::clients::{create_model, ModelConfig};
//! use agentllm::model::{GenerateOptions, Message, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//!
//!     let response = model
//!         .generate(
//!             &[Message::user("Who are you?")],
//!             &GenerateOptions::default(),
//!             &RequestOptions::default(),
//!         )
//!         .await?;
//!
//!     println!("Assistant: {}", response.text.unwrap_or_default());
//!     Ok(())
//! }
//! ```

use crate::agentllm::abort::AbortSignal;
use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::stream::EventStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Conversation role tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message: model text and/or requested tool calls.
    Assistant,
    /// A tool-result message correlating with a prior assistant [`ToolCall`].
    Tool,
}

/// A single tool call requested by the model in a native function-calling
/// response.
///
/// Providers assign an opaque [`id`](ToolCall::id) to each call; the id must
/// be echoed verbatim on the tool message that answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolSchema`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the model for this call.
    pub arguments: serde_json::Value,
}

/// A partial tool call carried by a streaming delta. Only the `id` is
/// guaranteed; name and argument fragments trickle in across chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fragment of the JSON argument string for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

/// A generic message in a conversation.
///
/// Messages are append-only within a single agent run; the engine never
/// mutates historical entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text body. Assistant messages that only request tools carry `None`.
    pub content: Option<String>,
    /// Tool calls requested by the assistant. Empty for all other roles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages, the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message carrying tool calls and optional text.
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool-result message answering `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Token accounting for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Unknown,
}

impl FinishReason {
    /// Parse a provider finish-reason label, defaulting to `Unknown`.
    pub fn parse(label: &str) -> Self {
        match label {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            _ => FinishReason::Unknown,
        }
    }
}

/// A complete, normalized model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
    pub finish_reason: FinishReason,
    /// Reasoning/thinking text when the provider surfaces it separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ModelResponse {
    /// A plain text response with the given finish reason.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
            reasoning: None,
        }
    }
}

/// Wire-facing description of a callable tool, forwarded to the provider's
/// function-calling API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters: serde_json::Value,
}

/// Requested output shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    /// JSON mode, optionally constrained by a schema.
    Json { schema: Option<serde_json::Value> },
}

/// Per-call generation knobs. Unset fields fall back to the adapter's
/// configured defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub response_format: Option<ResponseFormat>,
}

impl GenerateOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Merge this per-call override over `defaults`: set fields win, unset
    /// fields inherit.
    pub fn merged_over(&self, defaults: &GenerateOptions) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            stop: self.stop.clone().or_else(|| defaults.stop.clone()),
            response_format: self
                .response_format
                .clone()
                .or_else(|| defaults.response_format.clone()),
        }
    }
}

/// Per-request plumbing that is not a generation knob.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Cancellation signal checked before and during the request.
    pub signal: Option<AbortSignal>,
}

impl RequestOptions {
    pub fn with_signal(signal: AbortSignal) -> Self {
        Self {
            signal: Some(signal),
        }
    }

    /// Error if the attached signal has already fired.
    pub fn check_aborted(&self) -> Result<()> {
        if let Some(signal) = &self.signal {
            if signal.is_aborted() {
                return Err(AgentError::aborted(
                    signal
                        .reason()
                        .unwrap_or_else(|| "request was aborted".to_string()),
                ));
            }
        }
        Ok(())
    }
}

/// Capabilities reported by an adapter so callers can route around gaps.
#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_streaming: true,
            supports_json_mode: true,
        }
    }
}

/// Trait-driven abstraction over a concrete LLM provider.
///
/// Implementations translate the normalized request into the provider's wire
/// format and return responses in the uniform [`ModelResponse`] /
/// [`EventStream`] shapes.  All implementations must be thread-safe
/// (`Send + Sync`) so they can be shared between async tasks behind an
/// `Arc<dyn Model>`.
#[async_trait]
pub trait Model: Send + Sync {
    /// Full request/response chat completion without tools.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse>;

    /// Chat completion with native tool definitions forwarded to the
    /// provider. The response may carry [`ModelResponse::tool_calls`].
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse>;

    /// Streaming chat completion yielding normalized
    /// [`StreamEvent`](crate::agentllm::stream::StreamEvent)s.
    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<EventStream>;

    /// Identifier of the upstream model (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Provider label (e.g. `"openai"`, `"anthropic"`, `"fallback(a,b)"`).
    fn provider_name(&self) -> &str;

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::default()
    }
}

/// Split a `"provider:model"` identifier into its two segments.
///
/// Both sides must be non-empty; any other shape is rejected with a
/// descriptive [`AgentError::Config`].
pub fn parse_model_id(id: &str) -> Result<(String, String)> {
    let mut parts = id.splitn(2, ':');
    let provider = parts.next().unwrap_or("");
    let model = parts.next();
    match model {
        None => Err(AgentError::config(format!(
            "model id \"{}\" must have the form \"provider:model\"",
            id
        ))),
        Some(model) if provider.is_empty() || model.is_empty() => Err(AgentError::config(format!(
            "model id \"{}\" has an empty provider or model segment",
            id
        ))),
        Some(model) => Ok((provider.to_string(), model.to_string())),
    }
}
