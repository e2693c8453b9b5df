use agentllm::agent::{Agent, AgentConfig};
use agentllm::error::Result;
use agentllm::model::{
    GenerateOptions, Message, Model, ModelResponse, RequestOptions, ToolSchema, Usage,
};
use agentllm::stream::EventStream;
use agentllm::team::{
    create_team, CoordinationFn, CoordinationMode, TeamConfig, TeamResult,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};

struct ScriptedModel {
    replies: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
        })
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn generate(
        &self,
        _messages: &[Message],
        _options: &GenerateOptions,
        _request: &RequestOptions,
    ) -> Result<ModelResponse> {
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "(exhausted)".to_string());
        let mut response = ModelResponse::text(text);
        response.usage = Usage::new(5, 5);
        Ok(response)
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
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

fn agent(name: &str, replies: Vec<&str>) -> Arc<Agent> {
    Arc::new(Agent::new(AgentConfig::new(name, ScriptedModel::new(replies))).unwrap())
}

#[tokio::test]
async fn sequential_team_aggregates_usage() {
    let _ = env_logger::builder().is_test(true).try_init();
    let team = create_team(
        TeamConfig::new("pipeline")
            .with_agent(agent("outline", vec!["an outline"]))
            .with_agent(agent("draft", vec!["a draft"]))
            .with_agent(agent("polish", vec!["the final text"]))
            .with_mode(CoordinationMode::Sequential),
    )
    .unwrap();

    let result = team.run("write about ownership").await.unwrap();
    assert_eq!(result.final_output, "the final text");
    assert_eq!(result.rounds, 3);
    assert_eq!(result.agent_results.len(), 3);
    assert_eq!(result.total_usage.total_tokens, 30);
}

#[tokio::test]
async fn parallel_team_collects_every_view() {
    let team = create_team(
        TeamConfig::new("panel")
            .with_agent(agent("optimist", vec!["it will work"]))
            .with_agent(agent("pessimist", vec!["it will break"]))
            .with_mode(CoordinationMode::Parallel)
            .with_join_separator("\n===\n"),
    )
    .unwrap();

    let result = team.run("will the deploy succeed?").await.unwrap();
    assert!(result.final_output.contains("[optimist]\nit will work"));
    assert!(result.final_output.contains("[pessimist]\nit will break"));
    assert!(result.final_output.contains("\n===\n"));
}

#[tokio::test]
async fn custom_mode_sees_shared_context() {
    let coordination_fn: CoordinationFn = Arc::new(|agents, input, context| {
        Box::pin(async move {
            context.blackboard.set("task", json!(input.clone()));
            let mut outputs = Vec::new();
            for agent in &agents {
                let response = agent.run(&input).await?;
                context.send_message(agent.name(), "coordinator", response.text.clone());
                outputs.push(response.text);
            }

            // Everything the agents sent is readable on the bus.
            let inbox = context.get_messages("coordinator");
            assert_eq!(inbox.len(), agents.len());

            Ok(TeamResult {
                final_output: outputs.join(" | "),
                agent_results: context.previous_results(),
                rounds: 1,
                total_usage: Usage::default(),
            })
        })
    });

    let team = create_team(
        TeamConfig::new("custom")
            .with_agent(agent("a", vec!["alpha"]))
            .with_agent(agent("b", vec!["beta"]))
            .with_mode(CoordinationMode::Custom { coordination_fn }),
    )
    .unwrap();

    let result = team.run("shared task").await.unwrap();
    assert_eq!(result.final_output, "alpha | beta");
}

#[tokio::test]
async fn supervisor_round_trip() {
    let supervisor = Arc::new(
        Agent::new(
            AgentConfig::new(
                "lead",
                ScriptedModel::new(vec![
                    "WORKER: coder\nTASK: implement the parser",
                    "FINAL: parser shipped",
                ]),
            )
            .with_description("coordinates the crew"),
        )
        .unwrap(),
    );
    let worker = Arc::new(
        Agent::new(
            AgentConfig::new("coder", ScriptedModel::new(vec!["parser implemented"]))
                .with_description("writes code"),
        )
        .unwrap(),
    );

    let team = create_team(
        TeamConfig::new("crew")
            .with_agent(supervisor)
            .with_agent(worker)
            .with_mode(CoordinationMode::Supervisor {
                supervisor: "lead".to_string(),
            })
            .with_max_rounds(4),
    )
    .unwrap();

    let result = team.run("ship the parser").await.unwrap();
    assert_eq!(result.final_output, "parser shipped");
    // Supervisor decision, worker report, supervisor final.
    assert_eq!(result.agent_results.len(), 3);
}
