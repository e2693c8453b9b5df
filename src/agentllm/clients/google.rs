//! Google Gemini provider wrapper.
//!
//! Uses the OpenAI-compatible endpoint of the Generative Language API.
//! Consults `GOOGLE_API_KEY` and `GOOGLE_BASE_URL`.

use crate::agentllm::clients::openai_compat::{OpenAICompatClient, ProviderProfile};
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::Result;

pub fn profile() -> ProviderProfile {
    ProviderProfile::named(
        "google",
        "https://generativelanguage.googleapis.com/v1beta/openai",
    )
}

/// Build a Gemini-backed client for the given model.
pub fn client(model: &str, config: &ModelConfig) -> Result<OpenAICompatClient> {
    OpenAICompatClient::from_config(profile(), model, config)
}
