//! Streaming LLM Activity (SPEC_FULL.md §4.I).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sidekick_chat::ChatHistory;
use sidekick_core::error::CoreError;
use sidekick_core::ids::IdGenerator;
use sidekick_core::Result;
use sidekick_kv::KvStore;
use sidekick_llm::provider::{ChatRequest, MessageResponse, Options};
use sidekick_llm::{resolve_provider, LlmProvider, ProviderKind, SecretManager, StreamEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::ActivityContext;
use crate::flow_event::{FlowEvent, FlowEventStreamer};

const EVENT_CHANNEL_CAPACITY: usize = 10;

pub struct StreamActivityInput<'a> {
    pub workspace_id: String,
    pub flow_id: String,
    pub flow_action_id: String,
    pub provider_type: String,
    pub options: Options,
    pub secrets: &'a dyn SecretManager,
    pub heartbeat_interval: Duration,
}

/// Executes one LLM streaming call durably: hydrates the chat history,
/// fans provider events to the live flow-event stream while heartbeating,
/// and returns the provider's final response.
pub async fn run(
    ctx: Option<Arc<dyn ActivityContext>>,
    kv: &dyn KvStore,
    _ids: &dyn IdGenerator,
    history: Option<&mut dyn ChatHistory>,
    streamer: Arc<dyn FlowEventStreamer>,
    providers: &HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    input: StreamActivityInput<'_>,
) -> Result<MessageResponse> {
    let history = history.ok_or_else(|| CoreError::Arg("chat history is required".to_string()))?;

    let cancel = ctx
        .as_ref()
        .map(|c| c.cancellation_token().clone())
        .unwrap_or_default();
    history.hydrate(&cancel, kv).await?;

    let completion = CancellationToken::new();
    let heartbeat_handle = ctx.clone().map(|c| spawn_heartbeat(c, cancel.clone(), completion.clone(), input.heartbeat_interval));

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let consumer_handle = spawn_consumer(
        ctx.clone(),
        streamer,
        input.workspace_id.clone(),
        input.flow_id.clone(),
        input.flow_action_id.clone(),
        rx,
    );

    let kind = resolve_provider(&input.provider_type)
        .ok_or_else(|| CoreError::Config(format!("unresolved provider type: {}", input.provider_type)))?;
    let provider = providers
        .get(&kind)
        .ok_or_else(|| CoreError::Config(format!("no provider registered for {}", kind.canonical_name())))?;

    let request = ChatRequest { messages: history.messages()?, options: &input.options, secrets: input.secrets };
    let result = provider.stream(request, tx).await;

    completion.cancel();
    if let Some(handle) = heartbeat_handle {
        let _ = handle.await;
    }
    // The consumer drains whatever the provider buffered before tx was
    // dropped, then signals end-of-stream exactly once.
    let _ = consumer_handle.await;

    match result {
        Ok(mut response) => {
            response.provider = kind.canonical_name().to_string();
            sanitize_tool_name(&mut response);
            Ok(response)
        }
        Err(e) => {
            warn!(provider = kind.canonical_name(), error = %e, "provider stream failed");
            Err(CoreError::External(e.to_string()))
        }
    }
}

/// Provider-specific tool names occasionally carry characters downstream
/// tool-call parsers reject; this keeps the mapping in one place.
fn sanitize_tool_name(response: &mut MessageResponse) {
    for block in &mut response.output.content {
        if let sidekick_chat::ContentBlock::ToolUse { name, .. } = block {
            *name = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
        }
    }
}

fn spawn_heartbeat(
    ctx: Arc<dyn ActivityContext>,
    external_cancel: CancellationToken,
    completion: CancellationToken,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; discard it
        loop {
            tokio::select! {
                _ = external_cancel.cancelled() => break,
                _ = completion.cancelled() => break,
                _ = ticker.tick() => ctx.record_heartbeat(),
            }
        }
    })
}

fn spawn_consumer(
    ctx: Option<Arc<dyn ActivityContext>>,
    streamer: Arc<dyn FlowEventStreamer>,
    workspace_id: String,
    flow_id: String,
    flow_action_id: String,
    mut rx: mpsc::Receiver<StreamEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(ctx) = &ctx {
                ctx.record_heartbeat();
            }
            let flow_event = match event {
                StreamEvent::TextDelta { delta } => Some(FlowEvent::ChatMessageDelta { delta }),
                StreamEvent::SummaryTextDelta { delta } => Some(FlowEvent::ProgressText { delta }),
                _ => None,
            };
            if let Some(flow_event) = flow_event {
                if let Err(e) = streamer.add_flow_event(&workspace_id, &flow_id, flow_event).await {
                    warn!(error = %e, "failed to append flow event");
                }
            }
        }
        if !flow_action_id.is_empty() {
            if let Err(e) = streamer.end_flow_event_stream(&workspace_id, &flow_id, &flow_action_id).await {
                warn!(error = %e, "failed to signal end-of-stream");
            } else {
                info!(workspace_id, flow_id, "end-of-stream signaled");
            }
        }
    })
}
