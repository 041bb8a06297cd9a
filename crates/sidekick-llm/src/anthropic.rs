//! Anthropic Messages API provider, streaming via SSE.
//!
//! Reference implementation of [`LlmProvider`] grounded in the concrete
//! wire format; other provider types (OpenAI, OpenAI-compatible, Google)
//! are expected to follow the same shape but aren't needed by this layer's
//! contract tests.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sidekick_chat::{ContentBlock, Message as ChatMessage, Role};

use crate::provider::{ChatRequest, LlmProvider, MessageResponse, ProviderError, Usage};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(
        &self,
        request: ChatRequest<'_>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<MessageResponse, ProviderError> {
        let model =
            request.options.model_config.as_ref().map(|c| c.model.clone()).unwrap_or_default();
        let max_tokens = request.options.max_tokens.unwrap_or(4096);
        let body = build_request_body(&model, max_tokens, request.messages);

        debug!(model = %model, "sending request to Anthropic");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, body = %message, "Anthropic API error");
            return Err(ProviderError::Api { status, message });
        }

        process_stream(resp, tx).await
    }
}

fn build_request_body(model: &str, max_tokens: u32, messages: &[ChatMessage]) -> serde_json::Value {
    let wire_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "user",
                    // Anthropic has no standalone tool role; tool_result
                    // blocks ride along in the next user turn instead.
                    Role::Tool => "user",
                },
                "content": m.content.iter().map(block_to_wire).collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": wire_messages,
    })
}

fn block_to_wire(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text, .. } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::ToolUse { id, name, arguments, .. } => {
            serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": arguments})
        }
        ContentBlock::ToolResult { tool_call_id, is_error, content, .. } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "is_error": is_error.unwrap_or(false),
            "content": content.iter().map(block_to_wire).collect::<Vec<_>>(),
        }),
        ContentBlock::Image { url, .. } => serde_json::json!({"type": "image", "source": {"type": "url", "url": url}}),
        ContentBlock::File { url, name, .. } => serde_json::json!({"type": "text", "text": format!("[file {name}]({url})")}),
    }
}

/// Reads the SSE byte stream, emits translated [`StreamEvent`]s, and
/// assembles the final [`MessageResponse`] once the stream signals `Done`.
async fn process_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<MessageResponse, ProviderError> {
    use futures_util::StreamExt;

    let mut current_event = String::new();
    let mut text_acc = String::new();
    let mut tokens_in: u32 = 0;
    let mut tokens_out: u32 = 0;
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();
    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| ProviderError::Http(e.to_string()))?;
        let Ok(text) = std::str::from_utf8(&chunk) else { continue };
        line_buf.push_str(text);

        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => current_event = ev,
                Some(SseParsed::Data(data)) => {
                    if let Some(event) =
                        parse_data_block(&current_event, &data, &mut text_acc, &mut tokens_in, &mut tokens_out)
                    {
                        if tx.send(event).await.is_err() {
                            return Err(ProviderError::Cancelled);
                        }
                    }
                }
                None => {}
            }
        }
        line_buf = remainder;
    }

    let _ = tx.send(StreamEvent::Done).await;
    Ok(MessageResponse {
        output: ChatMessage::new(
            Role::Assistant,
            vec![ContentBlock::Text { text: text_acc, cache_control: None, context_type: None }],
        ),
        usage: Usage { tokens_in, tokens_out },
        provider: String::new(),
    })
}

fn parse_data_block(
    event_type: &str,
    data: &str,
    text_acc: &mut String,
    tokens_in: &mut u32,
    tokens_out: &mut u32,
) -> Option<StreamEvent> {
    match event_type {
        "message_start" => {
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                *tokens_in = msg.message.usage.input_tokens;
            }
            None
        }
        "content_block_delta" => {
            let delta: ContentBlockDelta = serde_json::from_str(data).ok()?;
            match delta.delta.delta_type.as_str() {
                "text_delta" => {
                    let text = delta.delta.text.unwrap_or_default();
                    text_acc.push_str(&text);
                    Some(StreamEvent::TextDelta { delta: text })
                }
                "thinking_delta" => Some(StreamEvent::Thinking { delta: delta.delta.thinking.unwrap_or_default() }),
                _ => None,
            }
        }
        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                *tokens_out = delta.usage.output_tokens;
            }
            None
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}
#[derive(Deserialize)]
struct MessageStartInner {
    usage: StartUsage,
}
#[derive(Deserialize)]
struct StartUsage {
    input_tokens: u32,
}
#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaInner,
}
#[derive(Deserialize)]
struct DeltaInner {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    thinking: Option<String>,
}
#[derive(Deserialize)]
struct MessageDelta {
    usage: EndUsage,
}
#[derive(Deserialize)]
struct EndUsage {
    output_tokens: u32,
}
