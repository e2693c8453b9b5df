//! Named-step workflow engine with branching, retries, and fallbacks.
//!
//! A [`Workflow`] executes steps in declared order, passing each step's
//! output to the next as input.  A step may carry a `condition` that names
//! the next step to jump to (or `"done"` to stop), per-step retries, a
//! fallback, and input/output transforms.  A step is backed by either a
//! plain async function or an [`Agent`].  Total step visits are bounded so
//! a branching loop cannot spin forever.
//!
//! # Example
//!
//! ```rust
//! use agentllm::workflow::{Workflow, WorkflowConfig, WorkflowStep};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main]
//! # async fn main() -> agentllm::error::Result<()> {
//! let workflow = Workflow::new(
//!     WorkflowConfig::new("double-then-label")
//!         .with_step(WorkflowStep::function("double", |input: Value| async move {
//!             Ok(json!(input.as_i64().unwrap_or(0) * 2))
//!         }))
//!         .with_step(WorkflowStep::function("label", |input: Value| async move {
//!             Ok(json!(format!("result: {}", input)))
//!         })),
//! )?;
//!
//! let outcome = workflow.run(json!(21)).await?;
//! assert_eq!(outcome.result, json!("result: 42"));
//! # Ok(())
//! # }
//! ```

use crate::agentllm::agent::Agent;
use crate::agentllm::error::{AgentError, Result};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Default bound on total step visits across branches and loops.
pub const DEFAULT_WORKFLOW_MAX_ITERATIONS: usize = 50;

/// Step name that terminates the workflow when returned by a condition.
pub const DONE_STEP: &str = "done";

type StepFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
type ConditionFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
type StepCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str, &AgentError) + Send + Sync>;

enum StepRunner {
    Function(StepFn),
    Agent(Arc<Agent>),
    Unset,
}

/// One named unit of work.
pub struct WorkflowStep {
    name: String,
    runner: StepRunner,
    input_transform: Option<TransformFn>,
    output_transform: Option<TransformFn>,
    condition: Option<ConditionFn>,
    retries: u32,
    fallback: Option<StepFn>,
}

impl WorkflowStep {
    /// A step with a name but no body yet; running it is an error unless a
    /// function or agent is attached.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runner: StepRunner::Unset,
            input_transform: None,
            output_transform: None,
            condition: None,
            retries: 0,
            fallback: None,
        }
    }

    /// A step backed by an async function.
    pub fn function<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut step = Self::new(name);
        step.runner = StepRunner::Function(Arc::new(move |input| Box::pin(f(input))));
        step
    }

    /// A step backed by an agent; the input value is stringified and fed to
    /// [`Agent::run`], and the agent's final text becomes the step output.
    pub fn agent(name: impl Into<String>, agent: Arc<Agent>) -> Self {
        let mut step = Self::new(name);
        step.runner = StepRunner::Agent(agent);
        step
    }

    /// Rewrite the input before the step body runs.
    pub fn with_input_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.input_transform = Some(Arc::new(f));
        self
    }

    /// Rewrite the output after the step body runs.
    pub fn with_output_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.output_transform = Some(Arc::new(f));
        self
    }

    /// Decide the next step from this step's result. Return a step name,
    /// [`DONE_STEP`] to stop, or `None` for declaration order.
    pub fn with_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    /// Extra attempts when the step body fails.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Ran with the step input when every attempt failed.
    pub fn with_fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |input| Box::pin(f(input))));
        self
    }
}

/// Configuration for [`Workflow::new`].
pub struct WorkflowConfig {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub max_iterations: usize,
    pub on_step_complete: Option<StepCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            max_iterations: DEFAULT_WORKFLOW_MAX_ITERATIONS,
            on_step_complete: None,
            on_error: None,
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_on_step_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.on_step_complete = Some(Arc::new(f));
        self
    }

    pub fn with_on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &AgentError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

/// The outcome of a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// Output of the last executed step.
    pub result: Value,
    /// Latest output of every executed step, keyed by step name.
    pub step_results: HashMap<String, Value>,
}

/// A validated, runnable workflow.
pub struct Workflow {
    pub name: String,
    steps: Vec<WorkflowStep>,
    index_by_name: HashMap<String, usize>,
    max_iterations: usize,
    on_step_complete: Option<StepCallback>,
    on_error: Option<ErrorCallback>,
}

impl Workflow {
    /// Validate the config. An empty step list, or duplicate step names,
    /// fail here.
    pub fn new(config: WorkflowConfig) -> Result<Self> {
        if config.steps.is_empty() {
            return Err(AgentError::config("workflow has no steps"));
        }
        let mut index_by_name = HashMap::new();
        for (index, step) in config.steps.iter().enumerate() {
            if index_by_name.insert(step.name.clone(), index).is_some() {
                return Err(AgentError::config(format!(
                    "workflow step \"{}\" is declared twice",
                    step.name
                )));
            }
        }
        Ok(Self {
            name: config.name,
            steps: config.steps,
            index_by_name,
            max_iterations: config.max_iterations,
            on_step_complete: config.on_step_complete,
            on_error: config.on_error,
        })
    }

    async fn run_step_body(&self, step: &WorkflowStep, input: Value) -> Result<Value> {
        match &step.runner {
            StepRunner::Function(f) => f(input).await,
            StepRunner::Agent(agent) => {
                let text_input = match &input {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let response = agent.run(&text_input).await?;
                Ok(Value::String(response.text))
            }
            StepRunner::Unset => Err(AgentError::config(format!(
                "workflow step \"{}\" has neither a function nor an agent",
                step.name
            ))),
        }
    }

    async fn execute_step(&self, step: &WorkflowStep, input: Value) -> Result<Value> {
        let input = match &step.input_transform {
            Some(transform) => transform(input),
            None => input,
        };

        let mut last_error: Option<AgentError> = None;
        for _ in 0..=step.retries {
            match self.run_step_body(step, input.clone()).await {
                Ok(output) => {
                    let output = match &step.output_transform {
                        Some(transform) => transform(output),
                        None => output,
                    };
                    return Ok(output);
                }
                Err(error) => last_error = Some(error),
            }
        }
        let error = last_error.unwrap_or_else(|| AgentError::other("step produced no error"));

        if let Some(fallback) = &step.fallback {
            if let Some(on_error) = &self.on_error {
                on_error(&step.name, &error);
            }
            let output = fallback(input).await?;
            let output = match &step.output_transform {
                Some(transform) => transform(output),
                None => output,
            };
            return Ok(output);
        }

        if let Some(on_error) = &self.on_error {
            on_error(&step.name, &error);
        }
        Err(error)
    }

    /// Run the workflow from its first step.
    pub async fn run(&self, input: Value) -> Result<WorkflowResult> {
        let mut step_results: HashMap<String, Value> = HashMap::new();
        let mut current = Some(0);
        let mut value = input;
        let mut visits = 0;

        while let Some(index) = current {
            visits += 1;
            if visits > self.max_iterations {
                return Err(AgentError::other(format!(
                    "workflow \"{}\" exceeded {} step visits",
                    self.name, self.max_iterations
                )));
            }

            let step = &self.steps[index];
            log::debug!("workflow {} running step {}", self.name, step.name);
            value = self.execute_step(step, value).await?;
            step_results.insert(step.name.clone(), value.clone());
            if let Some(on_step_complete) = &self.on_step_complete {
                on_step_complete(&step.name, &value);
            }

            current = match step.condition.as_ref().and_then(|c| c(&value)) {
                Some(target) if target == DONE_STEP => None,
                Some(target) => match self.index_by_name.get(&target) {
                    Some(next_index) => Some(*next_index),
                    None => {
                        return Err(AgentError::config(format!(
                            "workflow step \"{}\" routed to unknown step \"{}\"",
                            step.name, target
                        )))
                    }
                },
                None => {
                    if index + 1 < self.steps.len() {
                        Some(index + 1)
                    } else {
                        None
                    }
                }
            };
        }

        Ok(WorkflowResult {
            result: value,
            step_results,
        })
    }
}
