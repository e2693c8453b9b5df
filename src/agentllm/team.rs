//! Multi-agent team coordination.
//!
//! A [`Team`] runs several [`Agent`]s against one task under a
//! [`CoordinationMode`]: a sequential pipeline, a parallel fan-out, a
//! multi-round debate, a supervisor dispatching workers, or a fully custom
//! coordination function.  All modes share hook dispatch, usage
//! aggregation, and a [`TeamContext`] carrying a [`Blackboard`] and a
//! [`MessageBus`] that every agent in the team can see.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::agent::{Agent, AgentConfig};
//! use agentllm::clients::{create_model, ModelConfig};
//! use agentllm::team::{create_team, CoordinationMode, TeamConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> agentllm::error::Result<()> {
//! let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//! let researcher = Arc::new(Agent::new(
//!     AgentConfig::new("researcher", model.clone())
//!         .with_system_prompt("You gather facts."),
//! )?);
//! let writer = Arc::new(Agent::new(
//!     AgentConfig::new("writer", model).with_system_prompt("You write prose."),
//! )?);
//!
//! let team = create_team(
//!     TeamConfig::new("newsroom")
//!         .with_agent(researcher)
//!         .with_agent(writer)
//!         .with_mode(CoordinationMode::Sequential),
//! )?;
//!
//! let result = team.run("Write a paragraph about rust lifetimes.").await?;
//! println!("{}", result.final_output);
//! # Ok(())
//! # }
//! ```

use crate::agentllm::agent::Agent;
use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::Usage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Marker an agent can emit to stop a sequential pipeline early.
pub const DONE_TOKEN: &str = "[DONE]";

/// Shared keyed map visible to every agent in a team.
#[derive(Debug, Default)]
pub struct Blackboard {
    entries: Mutex<HashMap<String, Value>>,
}

impl Blackboard {
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.lock().unwrap().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.entries.lock().unwrap().clone()
    }
}

/// One stored bus record.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Passive message store. Messages are never delivered; consumers read
/// them when they choose to.
#[derive(Debug, Default)]
pub struct MessageBus {
    messages: Mutex<Vec<BusMessage>>,
}

impl MessageBus {
    pub fn send(&self, from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) {
        self.messages.lock().unwrap().push(BusMessage {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn get_for(&self, to: &str) -> Vec<BusMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == to)
            .cloned()
            .collect()
    }

    pub fn get_from(&self, from: &str) -> Vec<BusMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.from == from)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<BusMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

/// One agent's contribution to a team run.
#[derive(Debug, Clone)]
pub struct TeamAgentResult {
    pub agent_name: String,
    pub output: String,
    pub usage: Usage,
}

/// Shared state visible to every agent during one team run.
#[derive(Default)]
pub struct TeamContext {
    round: Mutex<usize>,
    previous_results: Mutex<Vec<TeamAgentResult>>,
    pub blackboard: Blackboard,
    pub bus: MessageBus,
}

impl TeamContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_round(&self) -> usize {
        *self.round.lock().unwrap()
    }

    fn set_round(&self, round: usize) {
        *self.round.lock().unwrap() = round;
    }

    pub fn previous_results(&self) -> Vec<TeamAgentResult> {
        self.previous_results.lock().unwrap().clone()
    }

    fn push_result(&self, result: TeamAgentResult) {
        self.previous_results.lock().unwrap().push(result);
    }

    /// Record a message on the bus.
    pub fn send_message(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.bus.send(from, to, content);
    }

    /// Messages addressed to `to`.
    pub fn get_messages(&self, to: &str) -> Vec<BusMessage> {
        self.bus.get_for(to)
    }
}

/// The outcome of one team run.
#[derive(Debug, Clone)]
pub struct TeamResult {
    pub final_output: String,
    pub agent_results: Vec<TeamAgentResult>,
    pub rounds: usize,
    pub total_usage: Usage,
}

/// Callbacks fired as the coordination progresses.
#[async_trait]
pub trait TeamHooks: Send + Sync {
    async fn on_round_start(&self, _round: usize) {}
    async fn on_agent_start(&self, _agent_name: &str) {}
    async fn on_agent_end(&self, _agent_name: &str, _output: &str) {}
    async fn on_round_end(&self, _round: usize) {}
    async fn on_error(&self, _error: &AgentError) {}
}

/// A user-supplied coordination strategy.
pub type CoordinationFn = Arc<
    dyn Fn(Vec<Arc<Agent>>, String, Arc<TeamContext>) -> BoxFuture<'static, Result<TeamResult>>
        + Send
        + Sync,
>;

/// How the team's agents collaborate.
#[derive(Clone)]
pub enum CoordinationMode {
    /// Agents run in order; each sees the previous agent's text prepended
    /// to the original input. `max_rounds` caps how many agents run, and a
    /// [`DONE_TOKEN`] in an agent's output stops the pipeline early.
    Sequential,
    /// All agents run concurrently on the same input; outputs are joined.
    Parallel,
    /// Agents take turns across up to `max_rounds` rounds, each seeing all
    /// prior statements.
    Debate,
    /// One agent dispatches tasks to the others by name and decides when
    /// the team is done.
    Supervisor { supervisor: String },
    /// Full control handed to `coordination_fn`.
    Custom { coordination_fn: CoordinationFn },
}

impl std::fmt::Debug for CoordinationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationMode::Sequential => write!(f, "Sequential"),
            CoordinationMode::Parallel => write!(f, "Parallel"),
            CoordinationMode::Debate => write!(f, "Debate"),
            CoordinationMode::Supervisor { supervisor } => {
                write!(f, "Supervisor({})", supervisor)
            }
            CoordinationMode::Custom { .. } => write!(f, "Custom"),
        }
    }
}

/// Configuration for [`create_team`].
pub struct TeamConfig {
    pub name: String,
    pub agents: Vec<Arc<Agent>>,
    pub mode: CoordinationMode,
    pub max_rounds: usize,
    pub hooks: Option<Arc<dyn TeamHooks>>,
    /// Separator between agent outputs in parallel mode.
    pub join_separator: String,
}

impl TeamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agents: Vec::new(),
            mode: CoordinationMode::Sequential,
            max_rounds: 5,
            hooks: None,
            join_separator: "\n\n".to_string(),
        }
    }

    pub fn with_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_agents(mut self, agents: Vec<Arc<Agent>>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn with_mode(mut self, mode: CoordinationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn TeamHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_join_separator(mut self, separator: impl Into<String>) -> Self {
        self.join_separator = separator.into();
        self
    }
}

/// A coordinated group of agents.
pub struct Team {
    pub name: String,
    mode: CoordinationMode,
    agents: Vec<Arc<Agent>>,
    max_rounds: usize,
    hooks: Option<Arc<dyn TeamHooks>>,
    join_separator: String,
}

/// Validate a [`TeamConfig`] and build the team.
pub fn create_team(config: TeamConfig) -> Result<Team> {
    if config.agents.is_empty() {
        return Err(AgentError::config("a team needs at least one agent"));
    }
    if let CoordinationMode::Supervisor { supervisor } = &config.mode {
        if !config.agents.iter().any(|a| a.name() == supervisor) {
            return Err(AgentError::config(format!(
                "supervisor \"{}\" is not one of the team's agents",
                supervisor
            )));
        }
    }
    Ok(Team {
        name: config.name,
        mode: config.mode,
        agents: config.agents,
        max_rounds: config.max_rounds.max(1),
        hooks: config.hooks,
        join_separator: config.join_separator,
    })
}

/// What a supervisor's reply asks for.
enum SupervisorDirective {
    Final(String),
    Dispatch { worker: String, task: String },
    Unparseable,
}

/// Parse the `WORKER:`/`TASK:`/`FINAL:` line protocol out of a supervisor
/// reply. Unparseable replies are treated as the final answer by the
/// caller so a confused supervisor cannot livelock the team.
fn parse_supervisor_directive(text: &str) -> SupervisorDirective {
    if let Some(position) = text.find("FINAL:") {
        return SupervisorDirective::Final(text[position + "FINAL:".len()..].trim().to_string());
    }

    let mut worker = None;
    let mut task_lines: Vec<String> = Vec::new();
    let mut in_task = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("WORKER:") {
            worker = Some(rest.trim().to_string());
            in_task = false;
        } else if let Some(rest) = trimmed.strip_prefix("TASK:") {
            task_lines.push(rest.trim().to_string());
            in_task = true;
        } else if in_task && !trimmed.is_empty() {
            task_lines.push(trimmed.to_string());
        }
    }

    match worker {
        Some(worker) if !task_lines.is_empty() => SupervisorDirective::Dispatch {
            worker,
            task: task_lines.join("\n"),
        },
        _ => SupervisorDirective::Unparseable,
    }
}

impl Team {
    pub fn coordination_mode(&self) -> &CoordinationMode {
        &self.mode
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run the team on `input`.
    pub async fn run(&self, input: &str) -> Result<TeamResult> {
        let context = Arc::new(TeamContext::new());
        let outcome = match &self.mode {
            CoordinationMode::Sequential => self.run_sequential(input, &context).await,
            CoordinationMode::Parallel => self.run_parallel(input, &context).await,
            CoordinationMode::Debate => self.run_debate(input, &context).await,
            CoordinationMode::Supervisor { supervisor } => {
                self.run_supervisor(input, supervisor, &context).await
            }
            CoordinationMode::Custom { coordination_fn } => {
                coordination_fn(self.agents.clone(), input.to_string(), context.clone()).await
            }
        };

        if let Err(error) = &outcome {
            if let Some(hooks) = &self.hooks {
                hooks.on_error(error).await;
            }
        }
        outcome
    }

    async fn run_agent(
        &self,
        agent: &Arc<Agent>,
        input: &str,
        context: &Arc<TeamContext>,
    ) -> Result<TeamAgentResult> {
        if let Some(hooks) = &self.hooks {
            hooks.on_agent_start(agent.name()).await;
        }
        let response = agent.run(input).await?;
        let result = TeamAgentResult {
            agent_name: agent.name().to_string(),
            output: response.text,
            usage: response.usage,
        };
        if let Some(hooks) = &self.hooks {
            hooks.on_agent_end(&result.agent_name, &result.output).await;
        }
        context.push_result(result.clone());
        Ok(result)
    }

    async fn run_sequential(&self, input: &str, context: &Arc<TeamContext>) -> Result<TeamResult> {
        let cap = self.max_rounds.min(self.agents.len());
        let mut results: Vec<TeamAgentResult> = Vec::new();
        let mut total_usage = Usage::default();

        for (index, agent) in self.agents.iter().take(cap).enumerate() {
            let round = index + 1;
            context.set_round(round);
            if let Some(hooks) = &self.hooks {
                hooks.on_round_start(round).await;
            }

            let agent_input = match results.last() {
                Some(previous) => format!("{}\n\n{}", previous.output, input),
                None => input.to_string(),
            };
            let result = self.run_agent(agent, &agent_input, context).await?;
            total_usage.add(&result.usage);
            let done = result.output.contains(DONE_TOKEN);
            results.push(result);

            if let Some(hooks) = &self.hooks {
                hooks.on_round_end(round).await;
            }
            if done {
                break;
            }
        }

        let rounds = results.len();
        let final_output = results
            .last()
            .map(|r| r.output.replace(DONE_TOKEN, "").trim().to_string())
            .unwrap_or_default();

        Ok(TeamResult {
            final_output,
            agent_results: results,
            rounds,
            total_usage,
        })
    }

    async fn run_parallel(&self, input: &str, context: &Arc<TeamContext>) -> Result<TeamResult> {
        context.set_round(1);
        if let Some(hooks) = &self.hooks {
            hooks.on_round_start(1).await;
        }

        let runs = self
            .agents
            .iter()
            .map(|agent| self.run_agent(agent, input, context));
        let outcomes = futures_util::future::join_all(runs).await;

        let mut results = Vec::new();
        let mut total_usage = Usage::default();
        for outcome in outcomes {
            let result = outcome?;
            total_usage.add(&result.usage);
            results.push(result);
        }

        if let Some(hooks) = &self.hooks {
            hooks.on_round_end(1).await;
        }

        let final_output = results
            .iter()
            .map(|r| format!("[{}]\n{}", r.agent_name, r.output))
            .collect::<Vec<_>>()
            .join(&self.join_separator);

        Ok(TeamResult {
            final_output,
            agent_results: results,
            rounds: 1,
            total_usage,
        })
    }

    async fn run_debate(&self, input: &str, context: &Arc<TeamContext>) -> Result<TeamResult> {
        let mut statements: Vec<(String, String)> = Vec::new();
        let mut results = Vec::new();
        let mut total_usage = Usage::default();

        for round in 1..=self.max_rounds {
            context.set_round(round);
            if let Some(hooks) = &self.hooks {
                hooks.on_round_start(round).await;
            }

            for agent in &self.agents {
                let mut prompt = input.to_string();
                if !statements.is_empty() {
                    prompt.push_str("\n\nPrevious statements:\n");
                    for (name, text) in &statements {
                        prompt.push_str(&format!("{}: {}\n", name, text));
                    }
                }
                let result = self.run_agent(agent, &prompt, context).await?;
                total_usage.add(&result.usage);
                statements.push((result.agent_name.clone(), result.output.clone()));
                results.push(result);
            }

            if let Some(hooks) = &self.hooks {
                hooks.on_round_end(round).await;
            }
        }

        let final_output = statements
            .last()
            .map(|(_, text)| text.clone())
            .unwrap_or_default();

        Ok(TeamResult {
            final_output,
            agent_results: results,
            rounds: self.max_rounds,
            total_usage,
        })
    }

    async fn run_supervisor(
        &self,
        input: &str,
        supervisor_name: &str,
        context: &Arc<TeamContext>,
    ) -> Result<TeamResult> {
        let supervisor = self
            .agents
            .iter()
            .find(|a| a.name() == supervisor_name)
            .ok_or_else(|| {
                AgentError::config(format!("supervisor \"{}\" not found", supervisor_name))
            })?;
        let workers: Vec<&Arc<Agent>> = self
            .agents
            .iter()
            .filter(|a| a.name() != supervisor_name)
            .collect();

        let roster = workers
            .iter()
            .map(|w| {
                format!(
                    "- {}: {}",
                    w.name(),
                    w.description().unwrap_or("no description")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut transcript = String::new();
        let mut results = Vec::new();
        let mut total_usage = Usage::default();
        let mut final_output: Option<String> = None;
        let mut rounds = 0;

        for round in 1..=self.max_rounds {
            rounds = round;
            context.set_round(round);
            if let Some(hooks) = &self.hooks {
                hooks.on_round_start(round).await;
            }

            let prompt = format!(
                "{}\n\nYou coordinate these workers:\n{}\n\n\
                 To delegate a task, reply with exactly:\nWORKER: <name>\nTASK: <task>\n\n\
                 When the work is complete, reply with:\nFINAL: <answer>{}",
                input, roster, transcript
            );

            let decision = self.run_agent(supervisor, &prompt, context).await?;
            total_usage.add(&decision.usage);
            let decision_text = decision.output.clone();
            results.push(decision);

            match parse_supervisor_directive(&decision_text) {
                SupervisorDirective::Final(answer) => {
                    final_output = Some(answer);
                    if let Some(hooks) = &self.hooks {
                        hooks.on_round_end(round).await;
                    }
                    break;
                }
                SupervisorDirective::Unparseable => {
                    final_output = Some(decision_text);
                    if let Some(hooks) = &self.hooks {
                        hooks.on_round_end(round).await;
                    }
                    break;
                }
                SupervisorDirective::Dispatch { worker, task } => {
                    match workers.iter().find(|w| w.name() == worker) {
                        Some(worker_agent) => {
                            let result = self.run_agent(worker_agent, &task, context).await?;
                            total_usage.add(&result.usage);
                            transcript.push_str(&format!(
                                "\n\nWorker {} reported:\n{}",
                                result.agent_name, result.output
                            ));
                            results.push(result);
                        }
                        None => {
                            transcript.push_str(&format!(
                                "\n\nNo worker named \"{}\" exists. Pick one of the listed workers.",
                                worker
                            ));
                        }
                    }
                }
            }

            if let Some(hooks) = &self.hooks {
                hooks.on_round_end(round).await;
            }
        }

        let final_output = final_output
            .or_else(|| results.last().map(|r| r.output.clone()))
            .unwrap_or_default();

        Ok(TeamResult {
            final_output,
            agent_results: results,
            rounds,
            total_usage,
        })
    }
}
