pub mod anthropic;
pub mod provider;
pub mod registry;
pub mod stream;

pub use anthropic::AnthropicProvider;
pub use provider::{
    ChatRequest, LlmProvider, MessageResponse, ModelConfig, Options, ProviderError, ReasoningEffort,
    SecretManager, ToolDefinition, Usage,
};
pub use registry::{resolve as resolve_provider, ProviderKind};
pub use stream::{parse_sse_line, SseParsed, StreamEvent};
