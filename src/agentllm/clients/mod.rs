//! Provider adapters and the `provider:model` resolution facade.
//!
//! Each provider module is a thin profile over one of two transports: the
//! OpenAI chat-completions adapter ([`openai_compat`]) or the Anthropic
//! messages adapter ([`anthropic`]).  [`create_model`] resolves a
//! `"provider:model"` identifier to the right adapter and threads the
//! configured defaults into every call.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::clients::{create_model, ModelConfig};
//!
//! let model = create_model(
//!     "anthropic:claude-sonnet-4-0",
//!     ModelConfig::default().with_temperature(0.2),
//! ).unwrap();
//! assert_eq!(model.provider_name(), "anthropic");
//! ```

pub mod anthropic;
pub mod dashscope;
pub mod deepseek;
pub mod google;
pub mod http_pool;
pub mod ollama;
pub mod openai;
pub mod openai_compat;

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::{parse_model_id, GenerateOptions, Model};
use openai_compat::{OpenAICompatClient, ProviderProfile};
use std::sync::Arc;

/// Construction-time configuration for a provider client.
///
/// Unset fields fall back to environment variables and provider defaults.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Explicit API key. Overrides the provider's environment variable.
    pub api_key: Option<String>,
    /// Explicit base URL. Overrides `<NAME>_BASE_URL` and the default.
    pub base_url: Option<String>,
    /// Default sampling temperature for every call on this model.
    pub temperature: Option<f32>,
    /// Default completion budget for every call on this model.
    pub max_tokens: Option<u32>,
    /// Whether keyless clients still send an empty `Authorization: Bearer `
    /// header (default true; some strict gateways reject it).
    pub send_empty_bearer: Option<bool>,
}

impl ModelConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_send_empty_bearer(mut self, send: bool) -> Self {
        self.send_empty_bearer = Some(send);
        self
    }

    /// The per-call defaults carried by clients built from this config.
    pub fn default_options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..GenerateOptions::default()
        }
    }
}

/// Resolve a `"provider:model"` identifier into a ready [`Model`].
///
/// Known providers: `openai`, `anthropic`, `google`, `deepseek`,
/// `dashscope`, `ollama`.  Any other label is accepted as a custom
/// OpenAI-compatible provider when the config carries an explicit base URL;
/// otherwise resolution fails with a configuration error.
pub fn create_model(id: &str, config: ModelConfig) -> Result<Arc<dyn Model>> {
    let (provider, model) = parse_model_id(id)?;
    match provider.as_str() {
        "openai" => Ok(Arc::new(openai::client(&model, &config)?)),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicClient::from_config(
            &model, &config,
        )?)),
        "google" => Ok(Arc::new(google::client(&model, &config)?)),
        "deepseek" => Ok(Arc::new(deepseek::client(&model, &config)?)),
        "dashscope" => Ok(Arc::new(dashscope::client(&model, &config)?)),
        "ollama" => Ok(Arc::new(ollama::client(&model, &config)?)),
        other => {
            if config.base_url.is_some() {
                let profile = ProviderProfile::named(other, "").optional_key();
                Ok(Arc::new(OpenAICompatClient::from_config(
                    profile, &model, &config,
                )?))
            } else {
                Err(AgentError::config(format!(
                    "unknown provider \"{}\"; pass a base_url to use it as an OpenAI-compatible endpoint",
                    other
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_model_unknown_provider_without_base_url() {
        let err = match create_model("mystery:model-1", ModelConfig::default()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[test]
    fn test_create_model_unknown_provider_with_base_url() {
        let model = create_model(
            "mystery:model-1",
            ModelConfig::default().with_base_url("http://localhost:8000/v1"),
        )
        .unwrap();
        assert_eq!(model.provider_name(), "mystery");
        assert_eq!(model.model_name(), "model-1");
    }

    #[test]
    fn test_create_model_rejects_malformed_id() {
        assert!(create_model("no-colon", ModelConfig::default()).is_err());
        assert!(create_model(":model", ModelConfig::default()).is_err());
        assert!(create_model("openai:", ModelConfig::default()).is_err());
    }

    #[test]
    fn test_create_model_ollama_without_key() {
        let model = create_model("ollama:qwen3:8b", ModelConfig::default()).unwrap();
        assert_eq!(model.provider_name(), "ollama");
        assert_eq!(model.model_name(), "qwen3:8b");
    }

    #[test]
    fn test_create_model_with_explicit_key() {
        let model = create_model(
            "openai:gpt-4o-mini",
            ModelConfig::default().with_api_key("sk-test"),
        )
        .unwrap();
        assert_eq!(model.provider_name(), "openai");
    }
}
