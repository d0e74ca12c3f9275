//! LLM provider abstraction, a concrete OpenAI-compatible adapter, and a
//! reliable wrapper that retries a single provider then fails over to
//! ordered fallbacks.

pub mod openai_compatible;
pub mod types;

use async_trait::async_trait;

use crate::error::CoreError;
pub use types::{ApiMessage, ApiRole, CompletionRequest, CompletionResponse, TokenUsage};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CoreError>;
    fn context_limit(&self) -> usize;
    fn supports_tools(&self) -> bool {
        true
    }
    fn provider_name(&self) -> &str;
}
