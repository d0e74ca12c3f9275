//! Generic OpenAI-compatible chat-completion provider.
//!
//! Works against any API that follows the OpenAI chat-completion protocol —
//! OpenAI itself, Anthropic/Gemini/OpenRouter/Vercel AI Gateway via their
//! OpenAI-compatible surfaces, and local servers such as Ollama. The only
//! differences between providers are base URL, auth header, and model ID
//! convention.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

use super::{ApiRole, CompletionRequest, CompletionResponse, LLMProvider, TokenUsage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub extra_headers: HashMap<String, String>,
    pub context_limit: usize,
    pub supports_tools: bool,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            default_model: String::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            extra_headers: HashMap::new(),
            context_limit: 128_000,
            supports_tools: true,
        }
    }
}

impl OpenAICompatibleConfig {
    pub fn with_model(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "https://api.openai.com/v1", "gpt-4o-mini")
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "https://api.anthropic.com/v1", "claude-3-5-sonnet-latest")
            .with_header("anthropic-version", "2023-06-01")
    }

    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::with_model(
            api_key,
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "gemini-1.5-flash",
        )
    }

    pub fn ollama() -> Self {
        Self::with_model("", "http://localhost:11434/v1", "llama3")
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "https://openrouter.ai/api/v1", "anthropic/claude-3.5-sonnet")
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
    config: OpenAICompatibleConfig,
    provider_name: String,
}

impl OpenAICompatibleProvider {
    pub fn new(config: OpenAICompatibleConfig, provider_name: impl Into<String>) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            config,
            provider_name: provider_name.into(),
        })
    }

    fn wire_role(role: ApiRole) -> &'static str {
        match role {
            ApiRole::System => "system",
            ApiRole::User => "user",
            ApiRole::Assistant => "assistant",
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let is_openai = self.provider_name == "openai";
        let is_o1_model = request.model.starts_with("o1");

        let temperature = if is_openai && is_o1_model { None } else { request.temperature };
        let (max_tokens, max_completion_tokens) = if is_openai && is_o1_model {
            (None, None)
        } else if is_openai {
            (None, request.max_tokens)
        } else {
            (request.max_tokens, None)
        };
        let top_p = if is_openai && is_o1_model { None } else { request.top_p };

        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: Self::wire_role(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            temperature,
            max_tokens,
            max_completion_tokens,
            top_p,
        }
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    async fn execute_with_retry(&self, body: &ChatCompletionRequest) -> Result<Response, CoreError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt - 1))).await;
            }

            let mut builder = self.client.post(&url).header("Content-Type", "application/json");
            if let Some(auth) = self.auth_header() {
                builder = builder.header("Authorization", auth);
            }
            for (key, value) in &self.config.extra_headers {
                builder = builder.header(key, value);
            }

            match builder.json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        let body = response.text().await.unwrap_or_default();
                        return Err(CoreError::LlmTransient(format!("http {status}: {body}")));
                    }
                    last_error = Some(format!("http {status}"));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(CoreError::LlmTransient(
            last_error.unwrap_or_else(|| "request failed".to_owned()),
        ))
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CoreError> {
        let wire_request = self.build_request(request);
        let response = self.execute_with_retry(&wire_request).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::LlmTransient(format!("parsing response: {e}")))?;

        let choice = parsed.choices.first().ok_or(CoreError::LlmNoContent)?;
        if choice.message.content.trim().is_empty() {
            return Err(CoreError::LlmNoContent);
        }

        Ok(CompletionResponse {
            content: choice.message.content.clone(),
            model: parsed.model,
            usage: parsed
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.clone(),
        })
    }

    fn context_limit(&self) -> usize {
        self.config.context_limit
    }

    fn supports_tools(&self) -> bool {
        self.config.supports_tools
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::ApiMessage;

    #[test]
    fn o1_model_drops_temperature_and_top_p_for_openai() {
        let config = OpenAICompatibleConfig::openai("key");
        let provider = OpenAICompatibleProvider::new(config, "openai").unwrap();
        let request = CompletionRequest::new("o1-preview", vec![ApiMessage::user("hi")])
            .with_temperature(0.7)
            .with_top_p(0.9)
            .with_max_tokens(100);
        let wire = provider.build_request(&request);
        assert!(wire.temperature.is_none());
        assert!(wire.top_p.is_none());
        assert!(wire.max_tokens.is_none());
        assert!(wire.max_completion_tokens.is_none());
    }

    #[test]
    fn non_o1_openai_uses_max_completion_tokens() {
        let config = OpenAICompatibleConfig::openai("key");
        let provider = OpenAICompatibleProvider::new(config, "openai").unwrap();
        let request = CompletionRequest::new("gpt-4o", vec![ApiMessage::user("hi")]).with_max_tokens(100);
        let wire = provider.build_request(&request);
        assert_eq!(wire.max_completion_tokens, Some(100));
        assert!(wire.max_tokens.is_none());
    }

    #[test]
    fn non_openai_provider_uses_legacy_max_tokens() {
        let config = OpenAICompatibleConfig::anthropic("key");
        let provider = OpenAICompatibleProvider::new(config, "anthropic").unwrap();
        let request = CompletionRequest::new("claude-3-5-sonnet-latest", vec![ApiMessage::user("hi")])
            .with_max_tokens(100);
        let wire = provider.build_request(&request);
        assert_eq!(wire.max_tokens, Some(100));
        assert!(wire.max_completion_tokens.is_none());
    }

    #[test]
    fn ollama_has_no_auth_header() {
        let provider = OpenAICompatibleProvider::new(OpenAICompatibleConfig::ollama(), "ollama").unwrap();
        assert!(provider.auth_header().is_none());
    }
}
