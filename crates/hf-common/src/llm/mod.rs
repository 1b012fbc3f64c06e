pub mod client;

pub use client::{FunctionSpec, GatewayClient, LlmError};

use crate::config::{parse_bool, parse_env};

/// Connection settings for the OpenAI-compatible AI gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let (model, endpoint) = provider_defaults("openai");
        Self {
            enabled: true,
            provider: "openai".into(),
            model,
            endpoint,
            api_key: String::new(),
            timeout_secs: 30,
            temperature: 0.2,
        }
    }
}

fn provider_defaults(provider: &str) -> (String, String) {
    match provider.to_ascii_lowercase().as_str() {
        "mistral" => (
            "mistral-large-latest".into(),
            "https://api.mistral.ai/v1/chat/completions".into(),
        ),
        "xai" => (
            "grok-2-latest".into(),
            "https://api.x.ai/v1/chat/completions".into(),
        ),
        "deepseek" => (
            "deepseek-chat".into(),
            "https://api.deepseek.com/chat/completions".into(),
        ),
        "local" | "vllm" | "ollama" => (
            "llama3.1".into(),
            "http://localhost:11434/v1/chat/completions".into(),
        ),
        _ => (
            "gpt-4o-mini".into(),
            "https://api.openai.com/v1/chat/completions".into(),
        ),
    }
}

fn provider_api_key(provider: &str) -> Option<String> {
    let key = match provider.to_ascii_lowercase().as_str() {
        "openai" => "OPENAI_API_KEY",
        "mistral" => "MISTRAL_API_KEY",
        "xai" => "XAI_API_KEY",
        "deepseek" => "DEEPSEEK_API_KEY",
        _ => return None,
    };
    std::env::var(key).ok()
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".into());
        let (default_model, default_endpoint) = provider_defaults(&provider);

        let api_key = std::env::var("LLM_API_KEY")
            .ok()
            .or_else(|| std::env::var("AI_GATEWAY_API_KEY").ok())
            .or_else(|| provider_api_key(&provider))
            .unwrap_or_default();

        Self {
            enabled: parse_bool("LLM_ENABLED", true),
            model: std::env::var("LLM_MODEL").unwrap_or(default_model),
            endpoint: std::env::var("LLM_ENDPOINT").unwrap_or(default_endpoint),
            provider,
            api_key,
            timeout_secs: parse_env::<u64>("LLM_TIMEOUT_SECONDS")
                .filter(|secs| *secs > 0)
                .unwrap_or(30),
            temperature: parse_env::<f32>("LLM_TEMPERATURE")
                .map(|t| t.clamp(0.0, 2.0))
                .unwrap_or(0.2),
        }
    }

    /// Local endpoints run without a key; hosted providers need one.
    pub fn is_usable(&self) -> bool {
        self.enabled && (!self.api_key.is_empty() || self.endpoint.starts_with("http://localhost"))
    }
}
