// src/lib.rs

// Import the top-level `agentllm` module.
pub mod agentllm;

// Re-export the module tree at the crate root so callers write
// `agentllm::clients::...` instead of `agentllm::agentllm::clients::...`.
pub use agentllm::{
    abort, agent, clients, context, error, guardrails, hooks, middleware, model, persistence,
    plugin, rate_limit, retry, schema, stream, structured, subagent, team, tool_composers,
    tool_registry, tools, trace, workflow,
};

#[cfg(feature = "server")]
pub use agentllm::server;

// Frequently used types, re-exported for convenience.
pub use agentllm::agent::{Agent, AgentConfig, AgentResponse, RunOptions};
pub use agentllm::clients::{create_model, ModelConfig};
pub use agentllm::error::{AgentError, Result};
pub use agentllm::model::{Message, Model, ModelResponse, Role, ToolCall, Usage};
pub use agentllm::stream::{EventStream, StreamEvent};
pub use agentllm::team::{create_team, CoordinationMode, Team, TeamConfig};
pub use agentllm::tool_registry::{Tool, ToolRegistry};
