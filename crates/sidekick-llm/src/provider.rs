//! LLM provider contract (SPEC_FULL.md §4.I, §6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sidekick_chat::Message;
use tokio::sync::mpsc;

use crate::stream::StreamEvent;

/// Caller-supplied secrets, passed through untouched to provider
/// implementations; this layer never inspects their contents.
pub trait SecretManager: Send + Sync {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
}

/// Per-request knobs a caller can tune; all optional beyond model/provider.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub model_config: Option<ModelConfig>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub service_tier: Option<String>,
    pub parallel_tool_calls: Option<bool>,
}

/// What a provider's `stream` call receives. Providers only see hydrated
/// messages, options, and an opaque secret manager — never storage-aware
/// types like `ChatHistory` or `MessageRef`.
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub options: &'a Options,
    pub secrets: &'a dyn SecretManager,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// What `provider.stream` resolves to once the stream completes.
#[derive(Debug, Clone)]
pub struct MessageResponse {
    pub output: Message,
    pub usage: Usage,
    /// Filled in by the caller after the provider returns, never by the
    /// provider itself.
    pub provider: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Common interface every LLM provider implements (Anthropic, OpenAI,
/// Google, and OpenAI-compatible gateways).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Streams events through `tx` and resolves to the final response once
    /// the provider signals completion.
    async fn stream(
        &self,
        request: ChatRequest<'_>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<MessageResponse, ProviderError>;
}
