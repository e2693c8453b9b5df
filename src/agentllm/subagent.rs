//! Structured sub-agent spawning.
//!
//! [`spawn_sub_agent`] is the agent equivalent of a process spawn: it
//! constructs a child agent from a config, runs it under a timeout with its
//! own abort controller, reports progress through a callback, and returns a
//! [`SubAgentResult`] instead of raising.  Nesting depth is bounded so
//! agents that spawn agents cannot recurse forever.  [`spawn_parallel`]
//! fans several children out concurrently and preserves input order.

use crate::agentllm::abort::{AbortController, AbortSignal};
use crate::agentllm::agent::{Agent, AgentConfig, AgentResponse, AgentStep, RunOptions};
use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::hooks::AgentHooks;
use crate::agentllm::model::ToolCall;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default cap on one child run.
pub const DEFAULT_SUBAGENT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default nesting bound.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Options for a spawn.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Total wall-clock budget for the child run.
    pub timeout: Option<Duration>,
    /// Spawns at `depth >= max_depth` fail immediately.
    pub max_depth: usize,
    /// Caller-side cancellation, wired into the child's own controller.
    pub signal: Option<AbortSignal>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_depth: DEFAULT_MAX_DEPTH,
            signal: None,
        }
    }
}

impl SpawnOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Progress event kinds emitted during a spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentProgressKind {
    Started,
    Step,
    Completed,
    Failed,
}

/// One progress event.
#[derive(Debug, Clone)]
pub struct SubAgentProgress {
    pub kind: SubAgentProgressKind,
    pub agent_name: String,
    /// Step number, set on [`SubAgentProgressKind::Step`] events.
    pub step: Option<usize>,
}

pub type ProgressCallback = Arc<dyn Fn(SubAgentProgress) + Send + Sync>;

/// Outcome of one spawn. Failures are captured here, never raised.
#[derive(Debug, Clone)]
pub struct SubAgentResult {
    pub success: bool,
    pub agent_name: String,
    pub response: Option<AgentResponse>,
    /// Total tokens the child consumed.
    pub tokens: usize,
    pub duration_ms: u64,
    /// Number of steps the child executed.
    pub steps: usize,
    pub error: Option<String>,
}

impl SubAgentResult {
    fn failure(agent_name: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            agent_name: agent_name.to_string(),
            response: None,
            tokens: 0,
            duration_ms,
            steps: 0,
            error: Some(error.into()),
        }
    }
}

fn emit(
    callback: &Option<ProgressCallback>,
    kind: SubAgentProgressKind,
    agent_name: &str,
    step: Option<usize>,
) {
    if let Some(callback) = callback {
        callback(SubAgentProgress {
            kind,
            agent_name: agent_name.to_string(),
            step,
        });
    }
}

/// Hooks shim that forwards step milestones to the progress callback while
/// delegating everything to the child's own hooks.
struct ProgressHooks {
    agent_name: String,
    inner: Option<Arc<dyn AgentHooks>>,
    callback: Option<ProgressCallback>,
}

#[async_trait]
impl AgentHooks for ProgressHooks {
    async fn on_start(&self, input: &str) {
        if let Some(inner) = &self.inner {
            inner.on_start(input).await;
        }
    }

    async fn on_tool_call(&self, call: &ToolCall) -> bool {
        match &self.inner {
            Some(inner) => inner.on_tool_call(call).await,
            None => true,
        }
    }

    async fn on_tool_result(&self, call: &ToolCall, result: &str) {
        if let Some(inner) = &self.inner {
            inner.on_tool_result(call, result).await;
        }
    }

    async fn on_step(&self, step: &AgentStep) {
        emit(
            &self.callback,
            SubAgentProgressKind::Step,
            &self.agent_name,
            Some(step.step_number),
        );
        if let Some(inner) = &self.inner {
            inner.on_step(step).await;
        }
    }

    async fn on_end(&self, response: &AgentResponse) {
        if let Some(inner) = &self.inner {
            inner.on_end(response).await;
        }
    }

    async fn on_error(&self, error: &AgentError) {
        if let Some(inner) = &self.inner {
            inner.on_error(error).await;
        }
    }
}

/// Run a child agent built from `config`.
///
/// Returns a failure result (never an `Err`) when the depth bound is hit,
/// construction fails, the run errors, or the timeout fires.  On timeout
/// the child is cancelled through its abort controller.
pub async fn spawn_sub_agent(
    mut config: AgentConfig,
    input: &str,
    opts: SpawnOptions,
    on_progress: Option<ProgressCallback>,
    depth: usize,
) -> SubAgentResult {
    let agent_name = config.name.clone();

    if depth >= opts.max_depth {
        emit(&on_progress, SubAgentProgressKind::Failed, &agent_name, None);
        return SubAgentResult::failure(&agent_name, "Maximum nesting depth exceeded", 0);
    }

    config.hooks = Some(Arc::new(ProgressHooks {
        agent_name: agent_name.clone(),
        inner: config.hooks.take(),
        callback: on_progress.clone(),
    }));

    let started = Instant::now();
    let agent = match Agent::new(config) {
        Ok(agent) => agent,
        Err(error) => {
            emit(&on_progress, SubAgentProgressKind::Failed, &agent_name, None);
            return SubAgentResult::failure(&agent_name, error.to_string(), 0);
        }
    };

    emit(&on_progress, SubAgentProgressKind::Started, &agent_name, None);

    let controller = AbortController::new();
    if let Some(signal) = opts.signal.clone() {
        let forward = controller.clone();
        tokio::spawn(async move {
            signal.cancelled().await;
            forward.abort(
                signal
                    .reason()
                    .unwrap_or_else(|| "parent cancelled the spawn".to_string()),
            );
        });
    }

    let timeout = opts.timeout.unwrap_or(DEFAULT_SUBAGENT_TIMEOUT);
    let run = agent.run_with_options(input, RunOptions::with_signal(controller.signal()));

    tokio::select! {
        result = run => {
            let duration_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(response) => {
                    emit(&on_progress, SubAgentProgressKind::Completed, &agent_name, None);
                    SubAgentResult {
                        success: true,
                        agent_name,
                        tokens: response.usage.total_tokens,
                        steps: response.steps.len(),
                        duration_ms,
                        response: Some(response),
                        error: None,
                    }
                }
                Err(error) => {
                    emit(&on_progress, SubAgentProgressKind::Failed, &agent_name, None);
                    SubAgentResult::failure(&agent_name, error.to_string(), duration_ms)
                }
            }
        }
        _ = tokio::time::sleep(timeout) => {
            controller.abort("sub-agent timed out");
            emit(&on_progress, SubAgentProgressKind::Failed, &agent_name, None);
            SubAgentResult::failure(
                &agent_name,
                format!("sub-agent \"{}\" timed out after {}ms", agent_name, timeout.as_millis()),
                started.elapsed().as_millis() as u64,
            )
        }
    }
}

/// Spawn one child per `(config, input)` pair, concurrently.
///
/// Results come back in input order; individual failures are
/// `success: false` entries.  Mismatched lengths are a configuration error.
pub async fn spawn_parallel(
    configs: Vec<AgentConfig>,
    inputs: Vec<String>,
    opts: SpawnOptions,
    on_progress: Option<ProgressCallback>,
) -> Result<Vec<SubAgentResult>> {
    if configs.len() != inputs.len() {
        return Err(AgentError::config(format!(
            "spawn_parallel needs one input per config ({} configs, {} inputs)",
            configs.len(),
            inputs.len()
        )));
    }

    let spawns = configs
        .into_iter()
        .zip(inputs)
        .map(|(config, input)| {
            let opts = opts.clone();
            let on_progress = on_progress.clone();
            async move { spawn_sub_agent(config, &input, opts, on_progress, 0).await }
        });

    Ok(futures_util::future::join_all(spawns).await)
}
