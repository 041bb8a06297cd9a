//! Flow-event streaming (SPEC_FULL.md §6, §4.I step 4).

use async_trait::async_trait;
use sidekick_core::Result;

/// Translated provider events a client observing a flow's live output sees.
/// Every other `StreamEvent` variant is dropped by the consumer.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    ChatMessageDelta { delta: String },
    ProgressText { delta: String },
}

/// External interface this layer appends flow events through; owned by the
/// outer storage/workflow layer.
#[async_trait]
pub trait FlowEventStreamer: Send + Sync {
    async fn add_flow_event(&self, workspace_id: &str, flow_id: &str, event: FlowEvent) -> Result<()>;

    /// Skipped by callers when `flow_action_id` is empty.
    async fn end_flow_event_stream(&self, workspace_id: &str, flow_id: &str, flow_action_id: &str) -> Result<()>;
}
