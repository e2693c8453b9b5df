//! OpenAI-compatible chat completions adapter.
//!
//! Most hosted providers (OpenAI, DeepSeek, Google's OpenAI surface,
//! DashScope, Ollama, and any self-hosted gateway) expose the same
//! `/chat/completions` wire format.  [`OpenAICompatClient`] implements the
//! full [`Model`] contract against that surface once; the provider-specific
//! modules in this directory are thin constructors that select a
//! [`ProviderProfile`].
//!
//! # Message serialisation
//!
//! | [`Role`] variant | Wire representation |
//! |---|---|
//! | `System` | `{"role":"system","content":"..."}` |
//! | `User` | `{"role":"user","content":"..."}` |
//! | `Assistant` with tool calls | `{"role":"assistant","content":null,"tool_calls":[...]}` |
//! | `Assistant` without tool calls | `{"role":"assistant","content":"..."}` |
//! | `Tool` | `{"role":"tool","tool_call_id":"<id>","content":"..."}` |
//!
//! Tool-call `function.arguments` travel as JSON strings on the wire and are
//! parsed back into structured values on the way in; malformed argument JSON
//! from the upstream is a provider error.

use crate::agentllm::abort::AbortSignal;
use crate::agentllm::clients::http_pool::shared_http_client;
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::{map_http_error, AgentError, Result};
use crate::agentllm::model::{
    FinishReason, GenerateOptions, Message, Model, ModelResponse, RequestOptions, ResponseFormat,
    Role, ToolCall, ToolCallDelta, ToolSchema, Usage,
};
use crate::agentllm::stream::{EventStream, StreamEvent};
use async_trait::async_trait;
use futures_util::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How long a streaming response may stay silent before the stream fails
/// with a timeout.
pub const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Static description of one OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Provider label used in errors and `provider:model` ids.
    pub provider: String,
    /// Base URL used when neither config nor environment override it.
    pub default_base_url: String,
    /// Environment variable consulted for the API key.
    pub api_key_env: String,
    /// Environment variable consulted for a base URL override.
    pub base_url_env: String,
    /// Whether construction fails without an API key.
    pub requires_api_key: bool,
}

impl ProviderProfile {
    /// Profile with conventional `<NAME>_API_KEY` / `<NAME>_BASE_URL`
    /// environment variables derived from the provider label.
    pub fn named(provider: &str, default_base_url: &str) -> Self {
        let upper = provider.to_uppercase().replace('-', "_");
        Self {
            provider: provider.to_string(),
            default_base_url: default_base_url.to_string(),
            api_key_env: format!("{}_API_KEY", upper),
            base_url_env: format!("{}_BASE_URL", upper),
            requires_api_key: true,
        }
    }

    /// Mark the API key as optional (local gateways such as Ollama).
    pub fn optional_key(mut self) -> Self {
        self.requires_api_key = false;
        self
    }
}

/// A [`Model`] speaking the OpenAI chat-completions wire format.
pub struct OpenAICompatClient {
    http: reqwest::Client,
    profile: ProviderProfile,
    model: String,
    api_key: Option<String>,
    base_url: String,
    defaults: GenerateOptions,
    send_empty_bearer: bool,
}

impl OpenAICompatClient {
    /// Build a client from a profile and user configuration.
    ///
    /// The API key resolves config-first, then the profile's environment
    /// variable; a required key that resolves to nothing is an
    /// authentication error.  The base URL resolves config, then
    /// environment, then the profile default.
    pub fn from_config(profile: ProviderProfile, model: &str, config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&profile.api_key_env).ok())
            .filter(|k| !k.is_empty());

        if api_key.is_none() && profile.requires_api_key {
            return Err(AgentError::Authentication {
                message: format!(
                    "no API key configured; set {} or pass one in the model config",
                    profile.api_key_env
                ),
                provider: Some(profile.provider.clone()),
            });
        }

        let base_url = config
            .base_url
            .clone()
            .or_else(|| std::env::var(&profile.base_url_env).ok())
            .unwrap_or_else(|| profile.default_base_url.clone());

        Ok(Self {
            http: shared_http_client().clone(),
            model: model.to_string(),
            api_key,
            base_url,
            defaults: config.default_options(),
            send_empty_bearer: config.send_empty_bearer.unwrap_or(true),
            profile,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn auth_header(&self) -> Option<String> {
        match &self.api_key {
            Some(key) => Some(format!("Bearer {}", key)),
            // Some OpenAI-compatible gateways expect the header even without
            // a key; strict servers can disable this via the model config.
            None if self.send_empty_bearer => Some("Bearer ".to_string()),
            None => None,
        }
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        options: &GenerateOptions,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(messages),
        });

        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(to_wire_tools(tools));
            }
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &options.stop {
            body["stop"] = json!(stop);
        }
        if let Some(ResponseFormat::Json { .. }) = &options.response_format {
            body["response_format"] = json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn post(&self, body: &Value, request: &RequestOptions) -> Result<reqwest::Response> {
        request.check_aborted()?;

        let mut builder = self
            .http
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }

        let send = builder.send();
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
                    "{} chat request failed: HTTP {} {}",
                    self.profile.provider,
                    status.as_u16(),
                    text
                );
            }
            return Err(map_http_error(
                status.as_u16(),
                &text,
                Some(&self.profile.provider),
                Some(&headers),
            ));
        }

        let parsed: Value = serde_json::from_str(&text)?;
        parse_chat_response(&parsed, &self.profile.provider)
    }
}

#[async_trait]
impl Model for OpenAICompatClient {
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
                Some(&self.profile.provider),
                Some(&headers),
            ));
        }

        Ok(sse_event_stream(
            response,
            request.signal.clone(),
            self.profile.provider.clone(),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        &self.profile.provider
    }
}

/// Serialise messages to the OpenAI wire shape.
pub(crate) fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({
                "role": "system",
                "content": msg.content.clone().unwrap_or_default(),
            }),
            Role::User => json!({
                "role": "user",
                "content": msg.content.clone().unwrap_or_default(),
            }),
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    json!({"role": "assistant", "content": msg.content})
                } else {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&tc.arguments)
                                        .unwrap_or_else(|_| "{}".to_string()),
                                }
                            })
                        })
                        .collect();
                    json!({
                        "role": "assistant",
                        "content": msg.content,
                        "tool_calls": tool_calls,
                    })
                }
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content.clone().unwrap_or_default(),
            }),
        })
        .collect()
}

/// Serialise tool schemas to the OpenAI `tools` array.
pub(crate) fn to_wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// Synthesised id for legacy `function_call` responses.
fn legacy_call_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("fc_{}", suffix)
}

fn parse_arguments(raw: &str, provider: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| {
        AgentError::provider(
            format!("tool call arguments are not valid JSON: {}", e),
            Some(provider),
        )
    })
}

fn parse_usage_value(value: Option<&Value>) -> Usage {
    let value = match value {
        Some(v) if !v.is_null() => v,
        _ => return Usage::default(),
    };
    let prompt = value
        .get("prompt_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let completion = value
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let total = value
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(prompt + completion);
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    }
}

/// Normalize a complete chat-completions response body.
///
/// Supports both the current `tool_calls` array and the legacy
/// `function_call` object (for which an `fc_<rand9>` id is synthesised).
pub(crate) fn parse_chat_response(value: &Value, provider: &str) -> Result<ModelResponse> {
    let choice = value
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| AgentError::provider("response has no choices", Some(provider)))?;
    let message = choice
        .get("message")
        .ok_or_else(|| AgentError::provider("response choice has no message", Some(provider)))?;

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());
    let reasoning = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
        for call in calls {
            let id = match call.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let function = match call.get("function") {
                Some(f) => f,
                None => continue,
            };
            let name = match function.get("name").and_then(|v| v.as_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let raw_args = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let arguments = if raw_args.trim().is_empty() {
                json!({})
            } else {
                parse_arguments(raw_args, provider)?
            };
            tool_calls.push(ToolCall {
                id,
                name,
                arguments,
            });
        }
    } else if let Some(function_call) = message.get("function_call") {
        if let Some(name) = function_call.get("name").and_then(|v| v.as_str()) {
            let raw_args = function_call
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let arguments = if raw_args.trim().is_empty() {
                json!({})
            } else {
                parse_arguments(raw_args, provider)?
            };
            tool_calls.push(ToolCall {
                id: legacy_call_id(),
                name: name.to_string(),
                arguments,
            });
        }
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(FinishReason::parse)
        .unwrap_or(FinishReason::Unknown);

    Ok(ModelResponse {
        text,
        tool_calls,
        usage: parse_usage_value(value.get("usage")),
        finish_reason,
        reasoning,
    })
}

/// Per-stream parser state: maps upstream tool-call indices to their ids so
/// argument fragments (which arrive without ids) can be attributed.
#[derive(Default)]
pub(crate) struct SseState {
    index_ids: HashMap<u64, String>,
}

/// Events produced by one SSE payload, plus whether the stream must stop.
pub(crate) struct PayloadEvents {
    pub events: Vec<StreamEvent>,
    pub terminal: bool,
}

/// Interpret one `data:` payload. Unparseable payloads return `None` and are
/// skipped by the reader.
pub(crate) fn events_from_payload(state: &mut SseState, payload: &str) -> Option<PayloadEvents> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let mut events = Vec::new();
    let mut terminal = false;

    if let Some(usage) = value.get("usage") {
        if !usage.is_null() {
            events.push(StreamEvent::Usage {
                usage: parse_usage_value(Some(usage)),
            });
        }
    }

    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
                if !content.is_empty() {
                    events.push(StreamEvent::TextDelta {
                        text: content.to_string(),
                    });
                }
            }
            if let Some(calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
                for call in calls {
                    let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                    if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                        state.index_ids.insert(index, id.to_string());
                    }
                    let id = match state.index_ids.get(&index) {
                        Some(id) => id.clone(),
                        // A fragment arrived before any id was announced for
                        // this index; nothing to attribute it to.
                        None => continue,
                    };
                    let function = call.get("function");
                    let name = function
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                        .map(|n| n.to_string());
                    let arguments_delta = function
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        .map(|a| a.to_string());
                    events.push(StreamEvent::ToolCallDelta {
                        tool_call: ToolCallDelta {
                            id,
                            name,
                            arguments_delta,
                        },
                    });
                }
            }
        }
        if choice.get("finish_reason").and_then(|f| f.as_str()) == Some("content_filter") {
            terminal = true;
        }
    }

    Some(PayloadEvents { events, terminal })
}

/// Read an SSE body into an [`EventStream`] using the chat-completions
/// payload interpretation.
///
/// A `content_filter` finish reason ends the stream without draining the
/// remainder.
pub(crate) fn sse_event_stream(
    response: reqwest::Response,
    signal: Option<AbortSignal>,
    provider: String,
) -> EventStream {
    let mut state = SseState::default();
    sse_reader(response, signal, provider, move |payload| {
        events_from_payload(&mut state, payload)
    })
}

/// Generic SSE read loop shared by the OpenAI-compatible and Anthropic
/// adapters; `interpret` turns one `data:` payload into events.
///
/// The reader keeps a carry buffer so events split across HTTP chunks are
/// reassembled, skips non-`data:` lines and unparseable payloads, treats
/// `data: [DONE]` as a terminator, enforces [`SSE_IDLE_TIMEOUT`] between
/// chunks, and checks the abort signal before every read.  Every stream that
/// does not fail ends with one `Done`.
pub(crate) fn sse_reader(
    response: reqwest::Response,
    signal: Option<AbortSignal>,
    provider: String,
    mut interpret: impl FnMut(&str) -> Option<PayloadEvents> + Send + 'static,
) -> EventStream {
    let (tx, rx) = mpsc::channel::<Result<StreamEvent>>(32);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut carry = String::new();
        let mut failed = false;

        'read: loop {
            if let Some(signal) = &signal {
                if signal.is_aborted() {
                    let reason = signal
                        .reason()
                        .unwrap_or_else(|| "stream was aborted".to_string());
                    let _ = tx.send(Err(AgentError::aborted(reason))).await;
                    failed = true;
                    break 'read;
                }
            }

            let chunk = match tokio::time::timeout(SSE_IDLE_TIMEOUT, body.next()).await {
                Err(_) => {
                    let _ = tx
                        .send(Err(AgentError::timeout(format!(
                            "{} stream idle for {}s",
                            provider,
                            SSE_IDLE_TIMEOUT.as_secs()
                        ))))
                        .await;
                    failed = true;
                    break 'read;
                }
                Ok(None) => break 'read,
                Ok(Some(Err(e))) => {
                    let _ = tx.send(Err(AgentError::from(e))).await;
                    failed = true;
                    break 'read;
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            carry.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = carry.find('\n') {
                let line: String = carry[..newline].trim_end_matches('\r').to_string();
                carry.drain(..=newline);

                let payload = match line.strip_prefix("data: ") {
                    Some(payload) => payload,
                    None => continue,
                };
                if payload == "[DONE]" {
                    break 'read;
                }
                let parsed = match interpret(payload) {
                    Some(parsed) => parsed,
                    None => continue,
                };
                for event in parsed.events {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                if parsed.terminal {
                    break 'read;
                }
            }
        }

        if !failed {
            let _ = tx.send(Ok(StreamEvent::Done)).await;
        }
    });

    EventStream::new(ReceiverStream::new(rx))
}
