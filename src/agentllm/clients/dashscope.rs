//! Alibaba DashScope (Qwen) provider wrapper.
//!
//! Uses DashScope's OpenAI compatible mode. Consults `DASHSCOPE_API_KEY`
//! and `DASHSCOPE_BASE_URL`.

use crate::agentllm::clients::openai_compat::{OpenAICompatClient, ProviderProfile};
use crate::agentllm::clients::ModelConfig;
use crate::agentllm::error::Result;

pub fn profile() -> ProviderProfile {
    ProviderProfile::named(
        "dashscope",
        "https://dashscope.aliyuncs.com/compatible-mode/v1",
    )
}

/// Build a DashScope-backed client for the given model.
pub fn client(model: &str, config: &ModelConfig) -> Result<OpenAICompatClient> {
    OpenAICompatClient::from_config(profile(), model, config)
}
