//! Ollama provider wrapper for local models.
//!
//! Ollama serves the OpenAI wire format on localhost and needs no API key.
//! When no key is configured an empty bearer header is still sent, which
//! keeps OpenAI-compatible gateways happy; strict servers can turn that off
//! with [`ModelConfig::with_send_empty_bearer`](crate::clients::ModelConfig::with_send_empty_bearer).
//! Consults `OLLAMA_API_KEY` (optional) and `OLLAMA_BASE_URL`.

use crate::agentllm::clients::openai_compat::{OpenAICompatClient, ProviderProfile};
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::Result;

pub fn profile() -> ProviderProfile {
    ProviderProfile::named("ollama", "http://localhost:11434/v1").optional_key()
}

/// Build an Ollama-backed client for the given model.
pub fn client(model: &str, config: &ModelConfig) -> Result<OpenAICompatClient> {
    OpenAICompatClient::from_config(profile(), model, config)
}
