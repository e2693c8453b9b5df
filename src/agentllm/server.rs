//! OpenAI-compatible HTTP facade over an [`Agent`].
//!
//! Only available with the `server` cargo feature.  Mounts
//! `POST /v1/chat/completions` on an axum router: the last user message of
//! the request becomes the agent input, and the agent's response is
//! translated back into an OpenAI chat completion (or a streamed sequence
//! of `chat.completion.chunk` events terminated by `data: [DONE]`).
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::agent::{Agent, AgentConfig};
//! use agentllm::clients::{create_model, ModelConfig};
//! use agentllm::server::serve;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> agentllm::error::Result<()> {
//! let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//! let agent = Arc::new(Agent::new(AgentConfig::new("assistant", model))?);
//! serve(agent, "127.0.0.1:8080").await
//! # }
//! ```

use crate::agentllm::agent::Agent;
use crate::agentllm::error::AgentError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;

fn completion_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("chatcmpl-{}", suffix)
}

fn error_envelope(message: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": "server_error",
            "code": null,
        }
    })
}

/// Parsed essentials of a chat completion request.
struct ParsedRequest {
    model: String,
    input: String,
    stream: bool,
}

fn parse_request(body: &str, default_model: &str) -> Result<ParsedRequest, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("request body is not valid JSON: {}", e))?;

    let messages = value
        .get("messages")
        .and_then(|m| m.as_array())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| "request must carry a non-empty \"messages\" array".to_string())?;

    let input = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
        .and_then(|m| m.get("content").and_then(|c| c.as_str()))
        .ok_or_else(|| "request has no user message".to_string())?
        .to_string();

    Ok(ParsedRequest {
        model: value
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(default_model)
            .to_string(),
        input,
        stream: value
            .get("stream")
            .and_then(|s| s.as_bool())
            .unwrap_or(false),
    })
}

fn completion_body(
    request: &ParsedRequest,
    response: &crate::agentllm::agent::AgentResponse,
) -> Value {
    let finish_reason = response
        .steps
        .last()
        .filter(|s| !s.model_response.tool_calls.is_empty())
        .map(|_| "tool_calls")
        .unwrap_or("stop");

    json!({
        "id": completion_id(),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": response.text,
            },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": response.usage.prompt_tokens,
            "completion_tokens": response.usage.completion_tokens,
            "total_tokens": response.usage.total_tokens,
        }
    })
}

fn chunk_events(
    request: &ParsedRequest,
    response: &crate::agentllm::agent::AgentResponse,
) -> Vec<Value> {
    let id = completion_id();
    let created = Utc::now().timestamp();
    let base = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": request.model,
    });

    let chunk = |delta: Value, finish: Value, usage: Option<Value>| {
        let mut value = base.clone();
        value["choices"] = json!([{ "index": 0, "delta": delta, "finish_reason": finish }]);
        if let Some(usage) = usage {
            value["usage"] = usage;
        }
        value
    };

    vec![
        chunk(json!({"role": "assistant"}), Value::Null, None),
        chunk(json!({"content": response.text}), Value::Null, None),
        chunk(
            json!({}),
            json!("stop"),
            Some(json!({
                "prompt_tokens": response.usage.prompt_tokens,
                "completion_tokens": response.usage.completion_tokens,
                "total_tokens": response.usage.total_tokens,
            })),
        ),
    ]
}

async fn chat_completions(State(agent): State<Arc<Agent>>, body: String) -> Response {
    let parsed = match parse_request(&body, agent.name()) {
        Ok(parsed) => parsed,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(error_envelope(&message))).into_response();
        }
    };

    let response = match agent.run(&parsed.input).await {
        Ok(response) => response,
        Err(error) => {
            log::error!("agent run failed behind the facade: {}", error);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_envelope(&error.to_string())),
            )
                .into_response();
        }
    };

    if parsed.stream {
        let mut events: Vec<Result<Event, Infallible>> = chunk_events(&parsed, &response)
            .into_iter()
            .map(|value| Ok(Event::default().data(value.to_string())))
            .collect();
        events.push(Ok(Event::default().data("[DONE]")));
        Sse::new(futures_util::stream::iter(events)).into_response()
    } else {
        Json(completion_body(&parsed, &response)).into_response()
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(error_envelope("not found"))).into_response()
}

/// Build the facade router around one agent.
pub fn build_router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .fallback(not_found)
        .with_state(agent)
}

/// Bind and serve the facade until the task is cancelled.
pub async fn serve(agent: Arc<Agent>, addr: &str) -> crate::agentllm::error::Result<()> {
    let app = build_router(agent);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::other(format!("failed to bind {}: {}", addr, e)))?;
    log::info!("agent facade listening on {}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| AgentError::other(format!("server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_extracts_last_user_message() {
        let body = json!({
            "model": "facade-model",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"}
            ],
            "stream": true
        })
        .to_string();

        let parsed = parse_request(&body, "fallback").unwrap();
        assert_eq!(parsed.model, "facade-model");
        assert_eq!(parsed.input, "second");
        assert!(parsed.stream);
    }

    #[test]
    fn test_parse_request_rejects_bad_payloads() {
        assert!(parse_request("{not json", "a").is_err());
        assert!(parse_request(r#"{"messages": []}"#, "a").is_err());
        assert!(parse_request(r#"{"foo": 1}"#, "a").is_err());
    }

    #[test]
    fn test_completion_body_shape() {
        use crate::agentllm::agent::AgentResponse;
        use crate::agentllm::model::Usage;

        let request = ParsedRequest {
            model: "m".into(),
            input: "q".into(),
            stream: false,
        };
        let response = AgentResponse {
            text: "answer".into(),
            steps: Vec::new(),
            tool_calls: Vec::new(),
            usage: Usage::new(3, 4),
            agent_name: "a".into(),
        };

        let body = completion_body(&request, &response);
        assert_eq!(body["object"], "chat.completion");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(body["choices"][0]["message"]["content"], "answer");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["total_tokens"], 7);
    }

    #[test]
    fn test_chunk_events_shape() {
        use crate::agentllm::agent::AgentResponse;
        use crate::agentllm::model::Usage;

        let request = ParsedRequest {
            model: "m".into(),
            input: "q".into(),
            stream: true,
        };
        let response = AgentResponse {
            text: "streamed".into(),
            steps: Vec::new(),
            tool_calls: Vec::new(),
            usage: Usage::new(1, 2),
            agent_name: "a".into(),
        };

        let chunks = chunk_events(&request, &response);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "streamed");
        assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
        assert_eq!(chunks[2]["usage"]["total_tokens"], 3);
    }
}
