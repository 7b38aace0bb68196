// LLM provider abstraction
//
// The reasoning engine talks to the model through `LlmProvider`, so tests
// can swap the Gemini client for a scripted one.

use anyhow::Result;
use async_trait::async_trait;

pub mod factory;
pub mod gemini;
pub mod retry;
pub mod types;

pub use factory::create_provider;
pub use gemini::GeminiProvider;
pub use retry::{with_retry, RetryPolicy};
pub use types::{ChatMessage, ChatRole, FunctionCall, GenerateRequest, LlmReply, ProviderError};

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and wait for the complete reply
    async fn generate(&self, request: &GenerateRequest) -> Result<LlmReply>;

    /// Provider name (e.g. "gemini")
    fn name(&self) -> &str;

    /// Model used for generation
    fn model(&self) -> &str;
}
