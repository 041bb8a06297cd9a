//! Reference-backed message storage keys (SPEC_FULL.md §3, §4.C).

use serde::{Deserialize, Serialize};

use crate::block::Role;

/// Points at the content blocks of one message, persisted separately in the
/// KV store under `{flow_id}:msg:{index}:block:{id}` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub flow_id: String,
    pub role: Role,
    pub block_ids: Vec<String>,
}

impl MessageRef {
    pub fn key_for(flow_id: &str, message_index: usize, block_id: &str) -> String {
        format!("{flow_id}:msg:{message_index}:block:{block_id}")
    }

    /// Extracts the block id suffix from a key produced by `key_for`.
    pub fn prefix_for(flow_id: &str, message_index: usize) -> String {
        format!("{flow_id}:msg:{message_index}:block:")
    }
}
