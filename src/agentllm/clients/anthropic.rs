//! Anthropic messages adapter.
//!
//! Anthropic's native `/messages` API differs from the chat-completions
//! shape: system prompts are a top-level field, assistant tool calls are
//! `tool_use` content blocks, tool results are `tool_result` blocks inside a
//! user message, and authentication uses `x-api-key` plus an
//! `anthropic-version` header.  This adapter normalizes all of that into the
//! same [`ModelResponse`] and [`StreamEvent`] shapes the rest of the runtime
//! consumes.

use crate::agentllm::clients::http_pool::shared_http_client;
use crate::agentllm::clients::openai_compat::{sse_reader, PayloadEvents};
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::{map_http_error, AgentError, Result};
use crate::agentllm::model::{
    FinishReason, GenerateOptions, Message, Model, ModelResponse, RequestOptions, Role, ToolCall,
    ToolCallDelta, ToolSchema, Usage,
};
use crate::agentllm::stream::{EventStream, StreamEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
/// The messages API requires `max_tokens`; used when the caller sets none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// A [`Model`] backed by Anthropic's messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    defaults: GenerateOptions,
}

impl AnthropicClient {
    pub fn from_config(model: &str, config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentError::Authentication {
                message: "no API key configured; set ANTHROPIC_API_KEY or pass one in the model config"
                    .to_string(),
                provider: Some("anthropic".to_string()),
            })?;
        let base_url = config
            .base_url
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            http: shared_http_client().clone(),
            model: model.to_string(),
            api_key,
            base_url,
            defaults: config.default_options(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        options: &GenerateOptions,
        stream: bool,
    ) -> Value {
        let (system, wire_messages) = to_wire_messages(messages);

        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": wire_messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &options.stop {
            body["stop_sequences"] = json!(stop);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(to_wire_tools(tools));
            }
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, body: &Value, request: &RequestOptions) -> Result<reqwest::Response> {
        request.check_aborted()?;

        let send = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send();

        let response = match &request.signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    return Err(AgentError::aborted(
                        signal.reason().unwrap_or_else(|| "request was aborted".to_string()),
                    ));
                }
                result = send => result?,
            },
            None => send.await?,
        };
        Ok(response)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        let effective = options.merged_over(&self.defaults);
        let body = self.build_body(messages, tools, &effective, false);
        let response = self.post(&body, request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "anthropic messages request failed: HTTP {} {}",
                    status.as_u16(),
                    text
                );
            }
            return Err(map_http_error(
                status.as_u16(),
                &text,
                Some("anthropic"),
                Some(&headers),
            ));
        }

        let parsed: Value = serde_json::from_str(&text)?;
        parse_messages_response(&parsed)
    }
}

#[async_trait]
impl Model for AnthropicClient {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.complete(messages, None, options, request).await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.complete(messages, Some(tools), options, request).await
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<EventStream> {
        let effective = options.merged_over(&self.defaults);
        let body = self.build_body(messages, None, &effective, true);
        let response = self.post(&body, request).await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await?;
            return Err(map_http_error(
                status.as_u16(),
                &text,
                Some("anthropic"),
                Some(&headers),
            ));
        }

        let mut state = MessagesSseState::default();
        Ok(sse_reader(
            response,
            request.signal.clone(),
            "anthropic".to_string(),
            move |payload| events_from_payload(&mut state, payload),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}

/// Convert internal messages into the messages-API shape.
///
/// Returns the joined top-level system prompt (if any) and the wire message
/// array.  Consecutive tool results are folded into a single user message so
/// role alternation holds.
fn to_wire_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut wire: Vec<Value> = Vec::new();
    let mut pending_tool_results: Vec<Value> = Vec::new();

    let flush_tool_results = |wire: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            wire.push(json!({"role": "user", "content": pending.drain(..).collect::<Vec<_>>()}));
        }
    };

    for msg in messages {
        match msg.role {
            Role::System => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.clone());
                }
            }
            Role::User => {
                flush_tool_results(&mut wire, &mut pending_tool_results);
                wire.push(json!({
                    "role": "user",
                    "content": msg.content.clone().unwrap_or_default(),
                }));
            }
            Role::Assistant => {
                flush_tool_results(&mut wire, &mut pending_tool_results);
                if msg.tool_calls.is_empty() {
                    wire.push(json!({
                        "role": "assistant",
                        "content": msg.content.clone().unwrap_or_default(),
                    }));
                } else {
                    let mut blocks: Vec<Value> = Vec::new();
                    if let Some(content) = &msg.content {
                        if !content.is_empty() {
                            blocks.push(json!({"type": "text", "text": content}));
                        }
                    }
                    for call in &msg.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    wire.push(json!({"role": "assistant", "content": blocks}));
                }
            }
            Role::Tool => {
                pending_tool_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content.clone().unwrap_or_default(),
                }));
            }
        }
    }
    flush_tool_results(&mut wire, &mut pending_tool_results);

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, wire)
}

fn to_wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let value = match value {
        Some(v) if !v.is_null() => v,
        _ => return Usage::default(),
    };
    let input = value
        .get("input_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let output = value
        .get("output_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    Usage::new(input, output)
}

/// Normalize a complete messages-API response body.
fn parse_messages_response(value: &Value) -> Result<ModelResponse> {
    let content = value
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| AgentError::provider("response has no content blocks", Some("anthropic")))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                if id.is_empty() || name.is_empty() {
                    continue;
                }
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }

    let finish_reason = value
        .get("stop_reason")
        .and_then(|s| s.as_str())
        .map(FinishReason::parse)
        .unwrap_or(FinishReason::Unknown);

    Ok(ModelResponse {
        text: if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text)
        },
        tool_calls,
        usage: parse_usage(value.get("usage")),
        finish_reason,
        reasoning: None,
    })
}

/// Streaming parser state: block index to tool-use id, plus the input token
/// count announced by `message_start` so the final usage event is complete.
#[derive(Default)]
struct MessagesSseState {
    block_ids: HashMap<u64, String>,
    input_tokens: usize,
}

fn events_from_payload(state: &mut MessagesSseState, payload: &str) -> Option<PayloadEvents> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let mut events = Vec::new();
    let mut terminal = false;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("message_start") => {
            state.input_tokens = value
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(|u| u.get("input_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
        }
        Some("content_block_start") => {
            let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(block) = value.get("content_block") {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let id = block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if !id.is_empty() {
                        state.block_ids.insert(index, id.clone());
                        events.push(StreamEvent::ToolCallDelta {
                            tool_call: ToolCallDelta {
                                id,
                                name: block
                                    .get("name")
                                    .and_then(|n| n.as_str())
                                    .map(|n| n.to_string()),
                                arguments_delta: None,
                            },
                        });
                    }
                }
            }
        }
        Some("content_block_delta") => {
            let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(delta) = value.get("delta") {
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(StreamEvent::TextDelta {
                                    text: text.to_string(),
                                });
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(id) = state.block_ids.get(&index) {
                            events.push(StreamEvent::ToolCallDelta {
                                tool_call: ToolCallDelta {
                                    id: id.clone(),
                                    name: None,
                                    arguments_delta: delta
                                        .get("partial_json")
                                        .and_then(|p| p.as_str())
                                        .map(|p| p.to_string()),
                                },
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        Some("message_delta") => {
            let output = value
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize;
            events.push(StreamEvent::Usage {
                usage: Usage::new(state.input_tokens, output),
            });
        }
        Some("message_stop") => {
            terminal = true;
        }
        // ping and unknown event types are skipped
        _ => {}
    }

    Some(PayloadEvents { events, terminal })
}
