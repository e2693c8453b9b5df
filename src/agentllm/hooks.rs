//! Lifecycle hooks for observing and steering agent runs.
//!
//! Implement [`AgentHooks`] to receive callbacks as a run progresses. All
//! hooks default to no-ops; [`AgentHooks::on_tool_call`] additionally acts
//! as a veto point: returning `false` blocks the tool call and feeds a
//! blocked notice back to the model.

use crate::agentllm::agent::{AgentResponse, AgentStep};
use crate::agentllm::error::AgentError;
use crate::agentllm::model::ToolCall;
use async_trait::async_trait;

/// Callbacks fired along the engine's control flow: `on_start`, then per
/// step `on_tool_call`/`on_tool_result`/`on_step`, then `on_end` (or
/// `on_error`).
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Fired before any work, with the raw user input.
    async fn on_start(&self, _input: &str) {}

    /// Fired before each tool execution. Return `false` to block the call.
    async fn on_tool_call(&self, _call: &ToolCall) -> bool {
        true
    }

    /// Fired after each tool execution (or skip) with the result text, or
    /// the error text when execution failed.
    async fn on_tool_result(&self, _call: &ToolCall, _result: &str) {}

    /// Fired after each recorded step.
    async fn on_step(&self, _step: &AgentStep) {}

    /// Fired with the final response just before `run` returns.
    async fn on_end(&self, _response: &AgentResponse) {}

    /// Fired when the run fails, before the error is rethrown.
    async fn on_error(&self, _error: &AgentError) {}
}

/// Hooks implementation that does nothing. Useful as a default.
pub struct NoopHooks;

#[async_trait]
impl AgentHooks for NoopHooks {}
