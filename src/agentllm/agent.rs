//! The agent engine: a ReAct loop over a [`Model`] and a tool registry.
//!
//! An [`Agent`] owns a model, a system prompt, tools, guardrails, content
//! filters, a middleware stack, and plugins.  [`Agent::run`] drives the
//! think/act/observe cycle: generate, dispatch any requested tool calls in
//! order, append the observations, and generate again, up to the iteration
//! bound.  Every lifecycle stage passes through the middleware stack, every
//! milestone fires the configured [`AgentHooks`], and an abort signal is
//! honoured at each iteration boundary.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::agent::{Agent, AgentConfig};
//! use agentllm::clients::{create_model, ModelConfig};
//! use agentllm::tool_registry::Tool;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> agentllm::error::Result<()> {
//!     let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//!
//!     let weather = Tool::new(
//!         "weather",
//!         "Current weather for a city.",
//!         json!({
//!             "type": "object",
//!             "properties": {"city": {"type": "string"}},
//!             "required": ["city"]
//!         }),
//!         |params| async move {
//!             Ok(json!(format!("Sunny in {}", params["city"].as_str().unwrap_or("?"))))
//!         },
//!     );
//!
//!     let agent = Agent::new(
//!         AgentConfig::new("forecaster", model)
//!             .with_system_prompt("You answer weather questions.")
//!             .with_tool(weather),
//!     )?;
//!
//!     let response = agent.run("What's the weather in Lisbon?").await?;
//!     println!("{}", response.text);
//!     Ok(())
//! }
//! ```

use crate::agentllm::abort::AbortSignal;
use crate::agentllm::error::{AgentError, GuardrailStage, Result};
use crate::agentllm::guardrails::{
    apply_content_filters, run_input_guardrails, run_output_guardrails, ContentFilter, Guardrail,
};
use crate::agentllm::hooks::AgentHooks;
use crate::agentllm::middleware::{
    AfterGenerateContext, AfterToolCallContext, BeforeGenerateContext, BeforeToolCallContext,
    ErrorContext, Middleware, MiddlewareStack,
};
use crate::agentllm::model::{
    Message, Model, ModelResponse, RequestOptions, ToolCall, Usage,
};
use crate::agentllm::plugin::{Plugin, PluginManager};
use crate::agentllm::tool_registry::{
    execute_tool, validate_parameters, Tool, ToolRegistry, DEFAULT_TOOL_TIMEOUT,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Default bound on generate/observe cycles per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub signal: Option<AbortSignal>,
}

impl RunOptions {
    pub fn with_signal(signal: AbortSignal) -> Self {
        Self {
            signal: Some(signal),
        }
    }
}

/// One executed (or skipped, or failed) tool call inside a step.
#[derive(Debug, Clone)]
pub struct StepToolCall {
    pub call: ToolCall,
    /// Result text fed back to the model. Empty when `error` is set.
    pub result: String,
    pub error: Option<String>,
}

/// One generate-plus-observed-tools cycle.
#[derive(Debug, Clone)]
pub struct AgentStep {
    /// 1-based position of this step within the run.
    pub step_number: usize,
    pub model_response: ModelResponse,
    pub tool_calls: Vec<StepToolCall>,
}

/// The outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Final text after output guardrails and content filters.
    pub text: String,
    pub steps: Vec<AgentStep>,
    /// Every tool call the model emitted, flattened across steps.
    pub tool_calls: Vec<ToolCall>,
    /// Sum of per-step model usage.
    pub usage: Usage,
    pub agent_name: String,
}

/// Everything needed to construct an [`Agent`].
#[derive(Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Short description used when this agent is listed to a supervisor.
    pub description: Option<String>,
    pub model: Arc<dyn Model>,
    pub system_prompt: String,
    pub tools: Vec<Tool>,
    pub max_iterations: usize,
    pub tool_timeout: Duration,
    pub hooks: Option<Arc<dyn AgentHooks>>,
    pub input_guardrails: Vec<Guardrail>,
    pub output_guardrails: Vec<Guardrail>,
    pub content_filters: Vec<ContentFilter>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, model: Arc<dyn Model>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model,
            system_prompt: String::new(),
            tools: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            hooks: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            content_filters: Vec::new(),
            middlewares: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_content_filter(mut self, filter: ContentFilter) -> Self {
        self.content_filters.push(filter);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// An LLM-backed agent with tools, middleware, and guardrails.
pub struct Agent {
    name: String,
    description: Option<String>,
    model: Arc<dyn Model>,
    system_prompt: String,
    max_iterations: usize,
    tool_timeout: Duration,
    hooks: Option<Arc<dyn AgentHooks>>,
    input_guardrails: Vec<Guardrail>,
    output_guardrails: Vec<Guardrail>,
    content_filters: Vec<ContentFilter>,
    registry: RwLock<ToolRegistry>,
    middleware: RwLock<MiddlewareStack>,
    plugins: Mutex<PluginManager>,
}

impl Agent {
    /// Construct an agent, registering configured tools, middlewares, and
    /// plugins. Duplicate tool or plugin names fail here.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let mut registry = ToolRegistry::new();
        for tool in config.tools {
            registry.register(tool)?;
        }

        let mut stack = MiddlewareStack::new();
        for middleware in config.middlewares {
            stack.use_middleware(middleware);
        }

        let mut plugins = PluginManager::new();
        for plugin in config.plugins {
            plugins.register(plugin, &mut stack, &mut registry)?;
        }

        Ok(Self {
            name: config.name,
            description: config.description,
            model: config.model,
            system_prompt: config.system_prompt,
            max_iterations: config.max_iterations,
            tool_timeout: config.tool_timeout,
            hooks: config.hooks,
            input_guardrails: config.input_guardrails,
            output_guardrails: config.output_guardrails,
            content_filters: config.content_filters,
            registry: RwLock::new(registry),
            middleware: RwLock::new(stack),
            plugins: Mutex::new(plugins),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    /// Tool names currently registered, in registration order.
    pub async fn list_tools(&self) -> Vec<String> {
        self.registry.read().await.list()
    }

    /// Install a plugin immediately, running its `on_install` callback.
    pub async fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        {
            let mut plugins = self.plugins.lock().await;
            let mut registry = self.registry.write().await;
            let mut stack = self.middleware.write().await;
            plugins.register(plugin, &mut stack, &mut registry)?;
        }
        self.plugins.lock().await.run_pending_installs().await
    }

    /// Run the agent with default options.
    pub async fn run(&self, input: &str) -> Result<AgentResponse> {
        self.run_with_options(input, RunOptions::default()).await
    }

    /// Run the agent. On failure the error middleware chain and the
    /// `on_error` hook observe the error before it is returned.
    pub async fn run_with_options(&self, input: &str, options: RunOptions) -> Result<AgentResponse> {
        match self.run_inner(input, &options).await {
            Ok(response) => Ok(response),
            Err(error) => {
                let mut ctx = ErrorContext {
                    error: error.clone(),
                    handled: false,
                };
                let stack = self.middleware.read().await;
                if let Err(chain_error) = stack.run_on_error(&mut ctx).await {
                    log::warn!("error middleware chain itself failed: {}", chain_error);
                }
                drop(stack);
                if let Some(hooks) = &self.hooks {
                    hooks.on_error(&error).await;
                }
                Err(error)
            }
        }
    }

    fn check_signal(options: &RunOptions, message: &str) -> Result<()> {
        if let Some(signal) = &options.signal {
            if signal.is_aborted() {
                return Err(AgentError::aborted(message));
            }
        }
        Ok(())
    }

    async fn run_inner(&self, input: &str, options: &RunOptions) -> Result<AgentResponse> {
        self.plugins.lock().await.run_pending_installs().await?;

        if let Some(hooks) = &self.hooks {
            hooks.on_start(input).await;
        }

        Self::check_signal(options, "Agent run was aborted before starting")?;

        let input_check = run_input_guardrails(&self.input_guardrails, input).await;
        if !input_check.passed {
            let reason = input_check.reason.unwrap_or_else(|| "rejected".to_string());
            return Err(AgentError::Guardrail {
                guardrail_name: reason.split(':').next().map(|s| s.trim().to_string()),
                message: reason,
                stage: GuardrailStage::Input,
            });
        }

        let registry = self.registry.read().await;
        let stack = self.middleware.read().await;
        let request = RequestOptions {
            signal: options.signal.clone(),
        };

        let mut messages = vec![
            Message::system(&self.system_prompt),
            Message::user(input),
        ];
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut flat_calls: Vec<ToolCall> = Vec::new();
        let mut total_usage = Usage::default();

        // A zero iteration budget still performs one generation so a run
        // always produces at least one step.
        let iterations = self.max_iterations.max(1);

        for iteration in 0..iterations {
            Self::check_signal(options, "Agent run was aborted")?;

            let mut before = BeforeGenerateContext {
                messages: std::mem::take(&mut messages),
                tools: registry.schemas(),
                iteration,
            };
            stack.run_before_generate(&mut before).await?;
            messages = before.messages;
            let tools = before.tools;

            let response = if tools.is_empty() {
                self.model
                    .generate(&messages, &Default::default(), &request)
                    .await?
            } else {
                self.model
                    .generate_with_tools(&messages, &tools, &Default::default(), &request)
                    .await?
            };

            let mut after = AfterGenerateContext {
                response,
                messages: std::mem::take(&mut messages),
                iteration,
            };
            stack.run_after_generate(&mut after).await?;
            messages = after.messages;
            let response = after.response;

            total_usage.add(&response.usage);

            messages.push(Message::assistant_with_tools(
                response.text.clone(),
                response.tool_calls.clone(),
            ));

            if response.tool_calls.is_empty() {
                let step = AgentStep {
                    step_number: steps.len() + 1,
                    model_response: response,
                    tool_calls: Vec::new(),
                };
                if let Some(hooks) = &self.hooks {
                    hooks.on_step(&step).await;
                }
                steps.push(step);
                break;
            }

            let mut step_calls: Vec<StepToolCall> = Vec::new();
            for call in response.tool_calls.clone() {
                flat_calls.push(call.clone());

                let allowed = match &self.hooks {
                    Some(hooks) => hooks.on_tool_call(&call).await,
                    None => true,
                };
                if !allowed {
                    let notice = "Tool call was blocked by hook.";
                    messages.push(Message::tool(&call.id, notice));
                    step_calls.push(StepToolCall {
                        call,
                        result: notice.to_string(),
                        error: None,
                    });
                    continue;
                }

                let mut before_tool = BeforeToolCallContext {
                    tool_known: registry.has(&call.name),
                    tool_call: call,
                    skip: false,
                    result: None,
                };
                stack.run_before_tool_call(&mut before_tool).await?;
                let call = before_tool.tool_call;

                if before_tool.skip {
                    let result = before_tool.result.unwrap_or_default();
                    messages.push(Message::tool(&call.id, &result));
                    let mut after_tool = AfterToolCallContext {
                        tool_call: call.clone(),
                        result,
                        error: None,
                    };
                    stack.run_after_tool_call(&mut after_tool).await?;
                    if let Some(hooks) = &self.hooks {
                        hooks.on_tool_result(&call, &after_tool.result).await;
                    }
                    step_calls.push(StepToolCall {
                        call,
                        result: after_tool.result,
                        error: None,
                    });
                    continue;
                }

                if !registry.has(&call.name) {
                    let detail = format!("Tool \"{}\" is not available.", call.name);
                    messages.push(Message::tool(
                        &call.id,
                        json!({ "error": detail }).to_string(),
                    ));
                    step_calls.push(StepToolCall {
                        call,
                        result: String::new(),
                        error: Some(detail),
                    });
                    continue;
                }

                let tool = registry.get(&call.name)?;
                let validation = validate_parameters(&call.arguments, &tool.parameters);
                if !validation.valid {
                    let detail = format!("Invalid parameters: {}", validation.errors.join("; "));
                    messages.push(Message::tool(
                        &call.id,
                        json!({ "error": detail }).to_string(),
                    ));
                    step_calls.push(StepToolCall {
                        call,
                        result: String::new(),
                        error: Some(detail),
                    });
                    continue;
                }

                let execution = execute_tool(tool, call.arguments.clone(), self.tool_timeout).await;
                match &execution.error {
                    Some(error) => messages.push(Message::tool(
                        &call.id,
                        json!({ "error": error }).to_string(),
                    )),
                    None => messages.push(Message::tool(&call.id, &execution.result)),
                }

                let mut after_tool = AfterToolCallContext {
                    tool_call: call.clone(),
                    result: execution.result,
                    error: execution.error,
                };
                stack.run_after_tool_call(&mut after_tool).await?;
                if let Some(hooks) = &self.hooks {
                    let observed = after_tool
                        .error
                        .as_deref()
                        .unwrap_or(&after_tool.result);
                    hooks.on_tool_result(&call, observed).await;
                }
                step_calls.push(StepToolCall {
                    call,
                    result: after_tool.result,
                    error: after_tool.error,
                });
            }

            let step = AgentStep {
                step_number: steps.len() + 1,
                model_response: response,
                tool_calls: step_calls,
            };
            if let Some(hooks) = &self.hooks {
                hooks.on_step(&step).await;
            }
            steps.push(step);
        }

        let exhausted = steps.len() == self.max_iterations
            && steps
                .last()
                .map(|s| !s.model_response.tool_calls.is_empty())
                .unwrap_or(false);
        if exhausted {
            return Err(AgentError::MaxIterations {
                iterations: self.max_iterations,
            });
        }

        let final_text = steps
            .last()
            .and_then(|s| s.model_response.text.clone())
            .unwrap_or_default();

        let output_check = run_output_guardrails(&self.output_guardrails, &final_text).await;
        if !output_check.passed {
            let reason = output_check.reason.unwrap_or_else(|| "rejected".to_string());
            return Err(AgentError::Guardrail {
                guardrail_name: reason.split(':').next().map(|s| s.trim().to_string()),
                message: reason,
                stage: GuardrailStage::Output,
            });
        }

        let final_text = match apply_content_filters(&self.content_filters, &final_text) {
            Some(filtered) => filtered,
            None => {
                return Err(AgentError::Guardrail {
                    message: "response text was blocked by a content filter".to_string(),
                    guardrail_name: None,
                    stage: GuardrailStage::ContentFilter,
                });
            }
        };

        let response = AgentResponse {
            text: final_text,
            steps,
            tool_calls: flat_calls,
            usage: total_usage,
            agent_name: self.name.clone(),
        };
        if let Some(hooks) = &self.hooks {
            hooks.on_end(&response).await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentllm::abort::AbortController;
    use crate::agentllm::guardrails::{max_length_guardrail, GuardrailResult};
    use crate::agentllm::middleware::Next;
    use crate::agentllm::model::{
        FinishReason, GenerateOptions, ModelCapabilities, ToolSchema,
    };
    use crate::agentllm::stream::EventStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted model: pops one response per generate call.
    struct MockModel {
        responses: StdMutex<Vec<ModelResponse>>,
        calls: AtomicUsize,
    }

    impl MockModel {
        fn new(mut responses: Vec<ModelResponse>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: StdMutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn text_response(text: &str) -> ModelResponse {
            let mut response = ModelResponse::text(text);
            response.usage = Usage::new(10, 5);
            response
        }

        fn tool_response(calls: Vec<ToolCall>) -> ModelResponse {
            ModelResponse {
                text: None,
                tool_calls: calls,
                usage: Usage::new(8, 2),
                finish_reason: FinishReason::ToolCalls,
                reasoning: None,
            }
        }
    }

    #[async_trait]
    impl Model for MockModel {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            _request: &RequestOptions,
        ) -> Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AgentError::other("mock ran out of responses"))
        }

        async fn generate_with_tools(
            &self,
            messages: &[Message],
            _tools: &[ToolSchema],
            options: &GenerateOptions,
            request: &RequestOptions,
        ) -> Result<ModelResponse> {
            self.generate(messages, options, request).await
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            _request: &RequestOptions,
        ) -> Result<EventStream> {
            Ok(EventStream::empty())
        }

        fn model_name(&self) -> &str {
            "mock"
        }

        fn provider_name(&self) -> &str {
            "test"
        }

        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities::default()
        }
    }

    fn greet_tool() -> Tool {
        Tool::new(
            "greet",
            "Greets someone.",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
            |params| async move {
                Ok(json!(format!(
                    "Hello {}",
                    params["name"].as_str().unwrap_or("?")
                )))
            },
        )
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_simple_generation() {
        let model = MockModel::new(vec![MockModel::text_response("Hi")]);
        let agent = Agent::new(AgentConfig::new("simple", model)).unwrap();

        let response = agent.run("Hello").await.unwrap();
        assert_eq!(response.text, "Hi");
        assert_eq!(response.steps.len(), 1);
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.agent_name, "simple");
    }

    #[tokio::test]
    async fn test_single_tool_call_flow() {
        let model = MockModel::new(vec![
            MockModel::tool_response(vec![call("c1", "greet", json!({"name": "world"}))]),
            MockModel::text_response("Done."),
        ]);
        let agent = Agent::new(
            AgentConfig::new("greeter", model).with_tool(greet_tool()),
        )
        .unwrap();

        let response = agent.run("Greet world").await.unwrap();
        assert_eq!(response.text, "Done.");
        assert_eq!(response.steps.len(), 2);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.steps[0].tool_calls[0].result, "Hello world");
        // Usage sums across both model calls.
        assert_eq!(response.usage.total_tokens, 10 + 15);
        // Step numbers are 1-based and sequential.
        assert_eq!(response.steps[0].step_number, 1);
        assert_eq!(response.steps[1].step_number, 2);
    }

    struct SkipMiddleware {
        observed_result: Arc<StdMutex<Option<String>>>,
    }

    #[async_trait]
    impl Middleware for SkipMiddleware {
        async fn before_tool_call(
            &self,
            ctx: &mut BeforeToolCallContext,
            next: Next<'_>,
        ) -> Result<()> {
            ctx.skip = true;
            ctx.result = Some("mocked".to_string());
            next.before_tool_call(ctx).await
        }

        async fn after_tool_call(
            &self,
            ctx: &mut AfterToolCallContext,
            next: Next<'_>,
        ) -> Result<()> {
            *self.observed_result.lock().unwrap() = Some(ctx.result.clone());
            next.after_tool_call(ctx).await
        }
    }

    #[tokio::test]
    async fn test_middleware_skip_avoids_execution() {
        let executions = Arc::new(AtomicUsize::new(0));
        let counter = executions.clone();
        let expensive = Tool::new("expensive", "Never runs.", json!({"type": "object"}), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!("real result")) }
        });

        let observed = Arc::new(StdMutex::new(None));
        let model = MockModel::new(vec![
            MockModel::tool_response(vec![call("c1", "expensive", json!({}))]),
            MockModel::text_response("done"),
        ]);
        let agent = Agent::new(
            AgentConfig::new("skipper", model)
                .with_tool(expensive)
                .with_middleware(Arc::new(SkipMiddleware {
                    observed_result: observed.clone(),
                })),
        )
        .unwrap();

        let response = agent.run("go").await.unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(response.steps[0].tool_calls[0].result, "mocked");
        assert_eq!(observed.lock().unwrap().as_deref(), Some("mocked"));
    }

    #[tokio::test]
    async fn test_unknown_tool_feeds_error_back() {
        let model = MockModel::new(vec![
            MockModel::tool_response(vec![call("c1", "ghost", json!({}))]),
            MockModel::text_response("recovered"),
        ]);
        let agent = Agent::new(AgentConfig::new("a", model).with_tool(greet_tool())).unwrap();

        let response = agent.run("go").await.unwrap();
        assert_eq!(response.text, "recovered");
        let error = response.steps[0].tool_calls[0].error.as_ref().unwrap();
        assert_eq!(error, "Tool \"ghost\" is not available.");
    }

    #[tokio::test]
    async fn test_invalid_parameters_feed_error_back() {
        let model = MockModel::new(vec![
            MockModel::tool_response(vec![call("c1", "greet", json!({"name": 42}))]),
            MockModel::text_response("recovered"),
        ]);
        let agent = Agent::new(AgentConfig::new("a", model).with_tool(greet_tool())).unwrap();

        let response = agent.run("go").await.unwrap();
        let error = response.steps[0].tool_calls[0].error.as_ref().unwrap();
        assert!(error.starts_with("Invalid parameters:"), "{}", error);
    }

    #[tokio::test]
    async fn test_pre_aborted_signal_rejects_before_model_call() {
        let model = MockModel::new(vec![MockModel::text_response("never")]);
        let calls_before = model.calls.load(Ordering::SeqCst);
        let agent = Agent::new(AgentConfig::new("a", model.clone())).unwrap();

        let controller = AbortController::new();
        controller.abort("cancelled");
        let err = agent
            .run_with_options("go", RunOptions::with_signal(controller.signal()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Aborted { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_max_iterations_error() {
        // The model keeps asking for tools on every call.
        let responses: Vec<ModelResponse> = (0..3)
            .map(|i| {
                MockModel::tool_response(vec![call(
                    &format!("c{}", i),
                    "greet",
                    json!({"name": "x"}),
                )])
            })
            .collect();
        let model = MockModel::new(responses);
        let agent = Agent::new(
            AgentConfig::new("looper", model)
                .with_tool(greet_tool())
                .with_max_iterations(3),
        )
        .unwrap();

        let err = agent.run("go").await.unwrap_err();
        assert!(matches!(err, AgentError::MaxIterations { iterations: 3 }));
    }

    #[tokio::test]
    async fn test_zero_max_iterations_still_generates_once() {
        let model = MockModel::new(vec![MockModel::text_response("once")]);
        let agent = Agent::new(
            AgentConfig::new("zero", model).with_max_iterations(0),
        )
        .unwrap();
        let response = agent.run("go").await.unwrap();
        assert_eq!(response.steps.len(), 1);
        assert_eq!(response.text, "once");
    }

    #[tokio::test]
    async fn test_input_guardrail_failure() {
        let model = MockModel::new(vec![MockModel::text_response("never")]);
        let agent = Agent::new(
            AgentConfig::new("guarded", model).with_input_guardrail(max_length_guardrail(3)),
        )
        .unwrap();

        let err = agent.run("far too long").await.unwrap_err();
        match err {
            AgentError::Guardrail { stage, message, .. } => {
                assert_eq!(stage, GuardrailStage::Input);
                assert!(message.contains("max-length"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_output_guardrail_failure() {
        let model = MockModel::new(vec![MockModel::text_response("a very long answer")]);
        let agent = Agent::new(
            AgentConfig::new("guarded", model).with_output_guardrail(Guardrail::sync(
                "no-long-answers",
                |text| {
                    if text.len() > 5 {
                        GuardrailResult::fail("too chatty")
                    } else {
                        GuardrailResult::pass()
                    }
                },
            )),
        )
        .unwrap();

        let err = agent.run("go").await.unwrap_err();
        match err {
            AgentError::Guardrail { stage, .. } => assert_eq!(stage, GuardrailStage::Output),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_content_filter_blocks_and_rewrites() {
        use crate::agentllm::guardrails::regex_block_filter;

        let model = MockModel::new(vec![MockModel::text_response("pin 1234 end")]);
        let agent = Agent::new(
            AgentConfig::new("redacting", model).with_content_filter(
                regex_block_filter("redact", r"\d{4}", Some("####")).unwrap(),
            ),
        )
        .unwrap();
        let response = agent.run("go").await.unwrap();
        assert_eq!(response.text, "pin #### end");

        let model = MockModel::new(vec![MockModel::text_response("secret-1 leaked")]);
        let agent = Agent::new(
            AgentConfig::new("blocking", model).with_content_filter(
                regex_block_filter("no-secrets", r"secret-\d+", None).unwrap(),
            ),
        )
        .unwrap();
        let err = agent.run("go").await.unwrap_err();
        match err {
            AgentError::Guardrail { stage, .. } => {
                assert_eq!(stage, GuardrailStage::ContentFilter)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    struct BlockingHooks;

    #[async_trait]
    impl AgentHooks for BlockingHooks {
        async fn on_tool_call(&self, _call: &ToolCall) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_hook_blocks_tool_call() {
        let executions = Arc::new(AtomicUsize::new(0));
        let counter = executions.clone();
        let tool = Tool::new("t", "Counts.", json!({"type": "object"}), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!("ran")) }
        });

        let model = MockModel::new(vec![
            MockModel::tool_response(vec![call("c1", "t", json!({}))]),
            MockModel::text_response("done"),
        ]);
        let agent = Agent::new(
            AgentConfig::new("vetoed", model)
                .with_tool(tool)
                .with_hooks(Arc::new(BlockingHooks)),
        )
        .unwrap();

        let response = agent.run("go").await.unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(
            response.steps[0].tool_calls[0].result,
            "Tool call was blocked by hook."
        );
    }

    struct LifecycleHooks {
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl AgentHooks for LifecycleHooks {
        async fn on_start(&self, input: &str) {
            self.log.lock().unwrap().push(format!("start:{}", input));
        }
        async fn on_step(&self, step: &AgentStep) {
            self.log.lock().unwrap().push(format!("step:{}", step.step_number));
        }
        async fn on_end(&self, response: &AgentResponse) {
            self.log.lock().unwrap().push(format!("end:{}", response.text));
        }
    }

    #[tokio::test]
    async fn test_hook_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let model = MockModel::new(vec![MockModel::text_response("out")]);
        let agent = Agent::new(
            AgentConfig::new("observed", model).with_hooks(Arc::new(LifecycleHooks {
                log: log.clone(),
            })),
        )
        .unwrap();

        agent.run("in").await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["start:in", "step:1", "end:out"]);
    }

    struct InstallCountingPlugin {
        installs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for InstallCountingPlugin {
        fn name(&self) -> &str {
            "counter"
        }
        async fn on_install(&self) -> Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_config_plugin_installs_on_first_run_only() {
        let installs = Arc::new(AtomicUsize::new(0));
        let model = MockModel::new(vec![
            MockModel::text_response("one"),
            MockModel::text_response("two"),
        ]);
        let agent = Agent::new(
            AgentConfig::new("plugged", model).with_plugin(Arc::new(InstallCountingPlugin {
                installs: installs.clone(),
            })),
        )
        .unwrap();

        assert_eq!(installs.load(Ordering::SeqCst), 0);
        agent.run("a").await.unwrap();
        assert_eq!(installs.load(Ordering::SeqCst), 1);
        agent.run("b").await.unwrap();
        assert_eq!(installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_tool_fails_at_construction() {
        let model = MockModel::new(vec![]);
        let result = Agent::new(
            AgentConfig::new("dup", model)
                .with_tool(greet_tool())
                .with_tool(greet_tool()),
        );
        assert!(result.is_err());
    }
}
