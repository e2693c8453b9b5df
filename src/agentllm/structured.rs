//! Schema-validated object generation with self-correcting retries.
//!
//! [`generate_object`] asks a model for JSON matching a schema and, when the
//! reply fails to parse or validate, feeds the failure back as a corrective
//! user message and tries again.  Each retry keeps the earlier attempts in
//! the prompt so the model can see what it got wrong.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::structured::{generate_object, StructuredOptions};
//! use agentllm::clients::{create_model, ModelConfig};
//! use agentllm::model::Message;
//! use serde_json::json;
//!
//! # async fn example() -> agentllm::error::Result<()> {
//! let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//! let schema = json!({
//!     "type": "object",
//!     "properties": {"city": {"type": "string"}, "population": {"type": "integer"}},
//!     "required": ["city", "population"]
//! });
//!
//! let result = generate_object(
//!     model.as_ref(),
//!     &schema,
//!     vec![Message::user("Largest city in France, as JSON.")],
//!     StructuredOptions::default(),
//! )
//! .await?;
//! println!("{}", result.object["city"]);
//! # Ok(())
//! # }
//! ```

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::{
    GenerateOptions, Message, Model, RequestOptions, ResponseFormat, Usage,
};
use crate::agentllm::schema::validate_schema;
use serde_json::Value;

/// Options for [`generate_object`].
#[derive(Debug, Clone)]
pub struct StructuredOptions {
    /// Corrective retries after the first attempt (4 total by default).
    pub max_retries: u32,
    pub options: GenerateOptions,
    pub request: RequestOptions,
}

impl Default for StructuredOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            options: GenerateOptions::default(),
            request: RequestOptions::default(),
        }
    }
}

impl StructuredOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }
}

/// A validated object plus the usage summed across all attempts.
#[derive(Debug, Clone)]
pub struct StructuredResult {
    pub object: Value,
    pub usage: Usage,
}

enum AttemptFailure {
    Parse,
    Validation,
}

/// Generate a JSON object conforming to `schema`.
///
/// One instruction message is appended to the conversation up front; each
/// failed attempt appends the model's text and a corrective user message
/// before retrying.  The returned usage is the sum over every attempt.
pub async fn generate_object(
    model: &dyn Model,
    schema: &Value,
    mut messages: Vec<Message>,
    opts: StructuredOptions,
) -> Result<StructuredResult> {
    let schema_text =
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    messages.push(Message::user(format!(
        "Respond with a single JSON object that matches this JSON schema exactly. \
         Do not wrap it in markdown fences or add commentary.\n\nSchema:\n{}",
        schema_text
    )));

    let generate_options = GenerateOptions {
        response_format: Some(ResponseFormat::Json {
            schema: Some(schema.clone()),
        }),
        ..opts.options.clone()
    };

    let attempts = opts.max_retries + 1;
    let mut total_usage = Usage::default();
    let mut last_failure = AttemptFailure::Parse;

    for attempt in 0..attempts {
        let response = model
            .generate(&messages, &generate_options, &opts.request)
            .await?;
        total_usage.add(&response.usage);

        let text = response.text.unwrap_or_default();
        let trimmed = text.trim();

        match serde_json::from_str::<Value>(trimmed) {
            Err(parse_error) => {
                last_failure = AttemptFailure::Parse;
                log::debug!(
                    "structured output attempt {} failed to parse: {}",
                    attempt + 1,
                    parse_error
                );
                messages.push(Message::assistant(text.clone()));
                messages.push(Message::user(format!(
                    "That response was not valid JSON ({}). Respond again with only a \
                     valid JSON object matching the schema.",
                    parse_error
                )));
            }
            Ok(object) => {
                let validation = validate_schema(&object, schema);
                if validation.valid {
                    return Ok(StructuredResult {
                        object,
                        usage: total_usage,
                    });
                }
                last_failure = AttemptFailure::Validation;
                log::debug!(
                    "structured output attempt {} failed validation: {:?}",
                    attempt + 1,
                    validation.errors
                );
                messages.push(Message::assistant(text.clone()));
                messages.push(Message::user(format!(
                    "That JSON does not match the schema. Problems:\n{}\nRespond again \
                     with a corrected JSON object.",
                    validation
                        .errors
                        .iter()
                        .map(|e| format!("- {}", e))
                        .collect::<Vec<_>>()
                        .join("\n")
                )));
            }
        }
    }

    Err(match last_failure {
        AttemptFailure::Parse => AgentError::other(format!(
            "failed to parse JSON after {} attempts",
            attempts
        )),
        AttemptFailure::Validation => AgentError::other(format!(
            "schema validation failed after {} attempts",
            attempts
        )),
    })
}

/// Like [`generate_object`], deserializing the result into `T`.
pub async fn generate_object_as<T: serde::de::DeserializeOwned>(
    model: &dyn Model,
    schema: &Value,
    messages: Vec<Message>,
    opts: StructuredOptions,
) -> Result<(T, Usage)> {
    let result = generate_object(model, schema, messages, opts).await?;
    let typed = serde_json::from_value(result.object)?;
    Ok((typed, result.usage))
}
