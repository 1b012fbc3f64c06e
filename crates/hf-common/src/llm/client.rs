//! OpenAI-compatible chat completions client restricted to forced tool calls.
//!
//! Every pipeline prompt asks the model to answer through a single function, so
//! the client returns the parsed function arguments and nothing else.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("AI gateway is disabled or has no API key")]
    Disabled,
    #[error("rate limited by AI gateway (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("AI gateway credits exhausted")]
    QuotaExhausted,
    #[error("AI gateway request failed: HTTP {status}: {body}")]
    RequestFailed { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to parse AI gateway response: {0}")]
    Parse(String),
    #[error("AI output rejected: {0}")]
    InvalidOutput(String),
}

/// A function the model is forced to call; `parameters` is a JSON schema.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    tools: [Value; 1],
    tool_choice: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

pub struct GatewayClient {
    client: Client,
    config: LlmConfig,
}

impl GatewayClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_usable()
    }

    /// Sends one system + user exchange and returns the arguments of the forced tool call.
    pub async fn call_function(
        &self,
        system: &str,
        user: &str,
        function: &FunctionSpec,
    ) -> Result<Value, LlmError> {
        if !self.is_enabled() {
            return Err(LlmError::Disabled);
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            tools: [json!({
                "type": "function",
                "function": {
                    "name": function.name,
                    "description": function.description,
                    "parameters": function.parameters,
                }
            })],
            tool_choice: json!({ "type": "function", "function": { "name": function.name } }),
        };

        let mut http_request = self.client.post(&self.config.endpoint).json(&request);
        if !self.config.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.config.api_key);
        }

        let started = Instant::now();
        let response = http_request
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let status = response.status();
        metrics::histogram!("hf_llm_request_seconds", "function" => function.name)
            .record(started.elapsed().as_secs_f64());

        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), function = function.name, "AI gateway call failed");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { retry_after_secs },
                StatusCode::PAYMENT_REQUIRED => LlmError::QuotaExhausted,
                _ => LlmError::RequestFailed {
                    status: status.as_u16(),
                    body: truncate(&body, 512),
                },
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::Parse("no choices in response".into()))?;

        let arguments = match message
            .tool_calls
            .into_iter()
            .find(|call| call.function.name == function.name)
        {
            Some(call) => call.function.arguments,
            // Some gateways ignore tool_choice and answer with bare JSON content.
            None => message
                .content
                .filter(|content| !content.trim().is_empty())
                .ok_or_else(|| LlmError::Parse(format!("no {} tool call in response", function.name)))?,
        };

        debug!(function = function.name, bytes = arguments.len(), "AI gateway tool call received");
        serde_json::from_str(strip_code_fence(&arguments)).map_err(|e| LlmError::Parse(e.to_string()))
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
