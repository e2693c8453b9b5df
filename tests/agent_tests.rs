use agentllm::agent::{Agent, AgentConfig};
use agentllm::error::{AgentError, Result};
use agentllm::middleware::{AfterGenerateContext, Middleware, Next};
use agentllm::model::{
    FinishReason, GenerateOptions, Message, Model, ModelResponse, RequestOptions, ToolCall,
    ToolSchema, Usage,
};
use agentllm::stream::EventStream;
use agentllm::tool_registry::Tool;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted model that pops one canned response per call and records how
/// many tools it was offered.
struct MockModel {
    responses: Mutex<Vec<ModelResponse>>,
    tool_counts: Mutex<Vec<usize>>,
}

impl MockModel {
    fn new(mut responses: Vec<ModelResponse>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
            tool_counts: Mutex::new(Vec::new()),
        })
    }

    fn text(text: &str) -> ModelResponse {
        let mut response = ModelResponse::text(text);
        response.usage = Usage::new(12, 6);
        response
    }

    fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ModelResponse {
        ModelResponse {
            text: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
            usage: Usage::new(9, 3),
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
        self.tool_counts.lock().unwrap().push(0);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| AgentError::other("mock exhausted"))
    }

    async fn generate_with_tools(
        &self,
        _messages: &[Message],
        tools: &[ToolSchema],
        _options: &GenerateOptions,
        _request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.tool_counts.lock().unwrap().push(tools.len());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| AgentError::other("mock exhausted"))
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
}

fn greet_tool() -> Tool {
    Tool::new(
        "greet",
        "Greets by name.",
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

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn full_tool_round_trip() {
    init_logs();
    let model = MockModel::new(vec![
        MockModel::tool_call("c1", "greet", json!({"name": "world"})),
        MockModel::text("Done."),
    ]);

    let agent = Agent::new(
        AgentConfig::new("integration", model.clone())
            .with_system_prompt("You greet people.")
            .with_tool(greet_tool()),
    )
    .unwrap();

    let response = agent.run("Greet world").await.unwrap();
    assert_eq!(response.text, "Done.");
    assert_eq!(response.steps.len(), 2);
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.steps[0].tool_calls[0].result, "Hello world");
    assert_eq!(response.usage.total_tokens, 12 + 18);

    // The tool schema was offered on every call.
    assert_eq!(*model.tool_counts.lock().unwrap(), vec![1, 1]);
}

struct RewriteResponse;

#[async_trait]
impl Middleware for RewriteResponse {
    async fn after_generate(&self, ctx: &mut AfterGenerateContext, next: Next<'_>) -> Result<()> {
        if let Some(text) = &ctx.response.text {
            ctx.response.text = Some(format!("{} (reviewed)", text));
        }
        next.after_generate(ctx).await
    }
}

#[tokio::test]
async fn middleware_can_rewrite_the_response() {
    let model = MockModel::new(vec![MockModel::text("raw answer")]);
    let agent = Agent::new(
        AgentConfig::new("rewriter", model).with_middleware(Arc::new(RewriteResponse)),
    )
    .unwrap();

    let response = agent.run("question").await.unwrap();
    assert_eq!(response.text, "raw answer (reviewed)");
}

#[tokio::test]
async fn plugin_installed_at_runtime_contributes_tools() {
    use agentllm::plugin::Plugin;

    struct GreeterPlugin {
        installs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for GreeterPlugin {
        fn name(&self) -> &str {
            "greeter"
        }
        fn tools(&self) -> Vec<Tool> {
            vec![greet_tool()]
        }
        async fn on_install(&self) -> Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let installs = Arc::new(AtomicUsize::new(0));
    let model = MockModel::new(vec![MockModel::text("ok")]);
    let agent = Agent::new(AgentConfig::new("pluggable", model)).unwrap();

    assert!(agent.list_tools().await.is_empty());
    agent
        .use_plugin(Arc::new(GreeterPlugin {
            installs: installs.clone(),
        }))
        .await
        .unwrap();

    // use_plugin installs immediately, without waiting for a run.
    assert_eq!(installs.load(Ordering::SeqCst), 1);
    assert_eq!(agent.list_tools().await, vec!["greet"]);
}

#[tokio::test]
async fn abort_mid_run_stops_between_iterations() {
    use agentllm::abort::AbortController;
    use agentllm::agent::RunOptions;

    let model = MockModel::new(vec![
        MockModel::tool_call("c1", "greet", json!({"name": "a"})),
        MockModel::text("never reached"),
    ]);

    let controller = AbortController::new();
    let aborter = controller.clone();
    let slow_tool = Tool::new(
        "greet",
        "Aborts the run from inside the tool.",
        json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        move |_| {
            aborter.abort("stop now");
            async { Ok(json!("done")) }
        },
    );

    let agent = Agent::new(AgentConfig::new("abortable", model).with_tool(slow_tool)).unwrap();
    let err = agent
        .run_with_options("go", RunOptions::with_signal(controller.signal()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Aborted { .. }));
}

#[tokio::test]
async fn structured_output_against_public_api() {
    use agentllm::structured::{generate_object, StructuredOptions};

    let model = MockModel::new(vec![MockModel::text(r#"{"city": "Paris"}"#)]);
    let schema = json!({
        "type": "object",
        "properties": {"city": {"type": "string"}},
        "required": ["city"]
    });

    let result = generate_object(
        model.as_ref(),
        &schema,
        vec![Message::user("capital of France?")],
        StructuredOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(result.object["city"], "Paris");
}

#[tokio::test]
async fn fallback_and_rate_limit_wrap_the_same_contract() {
    use agentllm::rate_limit::{RateLimiter, RateLimiterOptions};
    use agentllm::retry::FallbackModel;
    use std::time::Duration;

    let model = MockModel::new(vec![MockModel::text("wrapped")]);
    let providers: Vec<Arc<dyn Model>> = vec![model];
    let chain: Arc<dyn Model> = Arc::new(FallbackModel::new(providers).unwrap());
    let limited = RateLimiter::new(
        chain,
        RateLimiterOptions::new(5, 5, Duration::from_millis(100)),
    );

    let agent = Agent::new(AgentConfig::new("wrapped", Arc::new(limited))).unwrap();
    let response = agent.run("hi").await.unwrap();
    assert_eq!(response.text, "wrapped");
}
