//! Error taxonomy shared by every layer of the runtime.
//!
//! All fallible operations in the crate return [`Result<T>`](Result), an alias
//! over [`AgentError`].  The taxonomy mirrors the failure classes of LLM
//! provider APIs (transport, rate limits, authentication) plus the runtime's
//! own domain errors (tools, guardrails, configuration).  Retry and fallback
//! policies dispatch on [`is_retryable`].
//!
//! # Example
//!
//! ```rust
//! use agentllm::error::{map_http_error, is_retryable, AgentError};
//!
//! let err = map_http_error(429, "slow down", Some("openai"), None);
//! match &err {
//!     AgentError::RateLimited { provider, .. } => {
//!         assert_eq!(provider.as_deref(), Some("openai"));
//!     }
//!     _ => panic!("expected rate limit"),
//! }
//! assert!(is_retryable(&err));
//! ```

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Guardrail stage that rejected a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailStage {
    /// Input guardrails rejected the user message before any model call.
    Input,
    /// Output guardrails rejected the final response text.
    Output,
    /// A content filter blocked the final response text.
    ContentFilter,
}

impl std::fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardrailStage::Input => write!(f, "input"),
            GuardrailStage::Output => write!(f, "output"),
            GuardrailStage::ContentFilter => write!(f, "content-filter"),
        }
    }
}

/// The crate-wide error type.
///
/// Variants carry the metadata callers need to decide on recovery: the
/// provider label, the HTTP status, the `retry-after` interval, or the tool
/// and guardrail names involved.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Upstream provider failure (5xx or otherwise unclassified HTTP error).
    #[error("provider error{}: {message}", fmt_provider(.provider))]
    Provider {
        message: String,
        status_code: Option<u16>,
        provider: Option<String>,
    },

    /// HTTP 429 from a provider. `retry_after` is in seconds when the
    /// upstream supplied a parseable `retry-after` header.
    #[error("rate limited{}: {message}", fmt_provider(.provider))]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
        provider: Option<String>,
    },

    /// HTTP 401/403, or a missing API key at construction time.
    #[error("authentication failed{}: {message}", fmt_provider(.provider))]
    Authentication {
        message: String,
        provider: Option<String>,
    },

    /// A timer expired: SSE idle timeout, tool timeout, or queue wait.
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// HTTP 400 or another request the provider refused as malformed.
    #[error("invalid request{}: {message}", fmt_provider(.provider))]
    InvalidRequest {
        message: String,
        provider: Option<String>,
    },

    /// A tool's `execute` raised.
    #[error("tool execution failed{}: {message}", fmt_tool(.tool_name))]
    ToolExecution {
        message: String,
        tool_name: Option<String>,
    },

    /// An input/output guardrail or content filter rejected the run.
    #[error("guardrail rejected ({stage}): {message}")]
    Guardrail {
        message: String,
        guardrail_name: Option<String>,
        stage: GuardrailStage,
    },

    /// The run was cancelled through an abort signal.
    #[error("aborted: {message}")]
    Aborted { message: String },

    /// The ReAct loop exhausted its iteration budget while the model still
    /// wanted tools.
    #[error("maximum iterations ({iterations}) reached without a final response")]
    MaxIterations { iterations: usize },

    /// Plugin installation failure (duplicate name, failed `on_install`).
    #[error("{message}")]
    Plugin { message: String },

    /// Domain/configuration error raised at construction or registration.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A streaming response failed mid-flight.
    #[error("stream error: {message}")]
    Stream { message: String },

    /// Transport failure from the HTTP client.
    #[error("http error: {message}")]
    Http { message: String },

    /// JSON (de)serialization failure.
    #[error("json error: {message}")]
    Json { message: String },

    /// Anything that does not fit the taxonomy.
    #[error("{message}")]
    Other { message: String },
}

fn fmt_provider(provider: &Option<String>) -> String {
    match provider {
        Some(p) => format!(" ({})", p),
        None => String::new(),
    }
}

fn fmt_tool(tool: &Option<String>) -> String {
    match tool {
        Some(t) => format!(" ({})", t),
        None => String::new(),
    }
}

impl AgentError {
    /// Stable string code of the variant, for logging and wire envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Provider { .. } => "provider_error",
            AgentError::RateLimited { .. } => "rate_limit_error",
            AgentError::Authentication { .. } => "authentication_error",
            AgentError::Timeout { .. } => "timeout_error",
            AgentError::InvalidRequest { .. } => "invalid_request_error",
            AgentError::ToolExecution { .. } => "tool_execution_error",
            AgentError::Guardrail { .. } => "guardrail_error",
            AgentError::Aborted { .. } => "abort_error",
            AgentError::MaxIterations { .. } => "max_iterations_error",
            AgentError::Plugin { .. } => "plugin_error",
            AgentError::Config { .. } => "config_error",
            AgentError::Stream { .. } => "stream_error",
            AgentError::Http { .. } => "http_error",
            AgentError::Json { .. } => "json_error",
            AgentError::Other { .. } => "error",
        }
    }

    /// Create a provider error without status metadata.
    pub fn provider(message: impl Into<String>, provider: Option<&str>) -> Self {
        AgentError::Provider {
            message: message.into(),
            status_code: None,
            provider: provider.map(|p| p.to_string()),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        AgentError::Timeout {
            message: message.into(),
        }
    }

    /// Create an abort error.
    pub fn aborted(message: impl Into<String>) -> Self {
        AgentError::Aborted {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        AgentError::Config {
            message: message.into(),
        }
    }

    /// Create a stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        AgentError::Stream {
            message: message.into(),
        }
    }

    /// Create an uncategorized error.
    pub fn other(message: impl Into<String>) -> Self {
        AgentError::Other {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout {
                message: err.to_string(),
            }
        } else {
            AgentError::Http {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Json {
            message: err.to_string(),
        }
    }
}

/// Route an HTTP failure status into the taxonomy.
///
/// | Status | Variant |
/// |---|---|
/// | 401, 403 | [`AgentError::Authentication`] |
/// | 429 | [`AgentError::RateLimited`] (reads an integer `retry-after` header) |
/// | 400 | [`AgentError::InvalidRequest`] |
/// | 5xx and anything else | [`AgentError::Provider`] |
///
/// When the body is a JSON envelope with `error.message`, that message is
/// preferred over the raw body text.
pub fn map_http_error(
    status: u16,
    body: &str,
    provider: Option<&str>,
    headers: Option<&reqwest::header::HeaderMap>,
) -> AgentError {
    let message = extract_error_message(body);
    let provider = provider.map(|p| p.to_string());
    match status {
        401 | 403 => AgentError::Authentication { message, provider },
        429 => {
            let retry_after = headers
                .and_then(|h| h.get("retry-after"))
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            AgentError::RateLimited {
                message,
                retry_after,
                provider,
            }
        }
        400 => AgentError::InvalidRequest { message, provider },
        _ => AgentError::Provider {
            message,
            status_code: Some(status),
            provider,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }
    if body.is_empty() {
        "request failed".to_string()
    } else {
        body.to_string()
    }
}

/// Substrings in transport-layer messages that indicate a transient failure.
const TRANSIENT_HINTS: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "socket hang up",
    "fetch failed",
    "connection",
    "network",
];

/// Default retryability predicate used by the retry and fallback layers.
///
/// Rate limits, timeouts, and 5xx provider errors are retryable. Aborts,
/// authentication failures, and invalid requests never are. Raw transport
/// errors are matched against a list of transient hints.
pub fn is_retryable(error: &AgentError) -> bool {
    match error {
        AgentError::RateLimited { .. } | AgentError::Timeout { .. } => true,
        AgentError::Provider { status_code, .. } => {
            matches!(status_code, Some(code) if *code >= 500)
        }
        AgentError::Aborted { .. }
        | AgentError::Authentication { .. }
        | AgentError::InvalidRequest { .. } => false,
        AgentError::Http { message } | AgentError::Stream { message } | AgentError::Other { message } => {
            let lowered = message.to_lowercase();
            TRANSIENT_HINTS
                .iter()
                .any(|hint| lowered.contains(&hint.to_lowercase()))
        }
        _ => false,
    }
}
