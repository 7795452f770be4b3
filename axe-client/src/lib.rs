//! Wire layer: provider adapters and the failover model pool.
//!
//! Two adapters implement the [`Provider`] capability, one for the
//! Anthropic messages API and one for OpenAI-style chat completions.
//! [`ModelPool`] rotates across the configured providers with a sticky
//! active index.

mod anthropic;
mod error;
mod openai;
mod pool;
mod retry;

pub use anthropic::AnthropicProvider;
pub use error::LlmError;
pub use openai::OpenAiProvider;
pub use pool::ModelPool;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use axe_core::agent::StreamCallbacks;
use axe_core::types::{Message, Response};
use serde::{Deserialize, Serialize};

/// Which wire protocol a configured model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Connection settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Uniform capability both adapters implement.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Non-streaming request.
    async fn send(&self, system: &str, messages: &[Message]) -> Result<Response, LlmError>;

    /// Streaming request; callbacks fire as the stream decodes. Text
    /// already delivered through callbacks is not retracted on error.
    async fn send_stream(
        &self,
        system: &str,
        messages: &[Message],
        callbacks: &StreamCallbacks,
    ) -> Result<Response, LlmError>;

    fn model_name(&self) -> &str;
}
