//! DeepSeek provider wrapper.
//!
//! DeepSeek exposes an OpenAI-compatible surface at `api.deepseek.com`.
//! Consults `DEEPSEEK_API_KEY` and `DEEPSEEK_BASE_URL`.

use crate::agentllm::clients::openai_compat::{OpenAICompatClient, ProviderProfile};
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::Result;

pub fn profile() -> ProviderProfile {
    ProviderProfile::named("deepseek", "https://api.deepseek.com/v1")
}

/// Build a DeepSeek-backed client for the given model.
pub fn client(model: &str, config: &ModelConfig) -> Result<OpenAICompatClient> {
    OpenAICompatClient::from_config(profile(), model, config)
}
