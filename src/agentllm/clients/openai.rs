//! OpenAI provider wrapper.
//!
//! Thin profile over the shared OpenAI-compatible transport. Consults
//! `OPENAI_API_KEY` and `OPENAI_BASE_URL`.

use crate::agentllm::clients::openai_compat::{OpenAICompatClient, ProviderProfile};
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::Result;

pub fn profile() -> ProviderProfile {
    ProviderProfile::named("openai", "https://api.openai.com/v1")
}

/// Build an OpenAI-backed client for the given model.
pub fn client(model: &str, config: &ModelConfig) -> Result<OpenAICompatClient> {
    OpenAICompatClient::from_config(profile(), model, config)
}
