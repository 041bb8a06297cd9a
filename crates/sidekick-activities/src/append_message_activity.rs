//! Append-Message Activity (SPEC_FULL.md §4.K).

use std::collections::BTreeMap;

use sidekick_chat::{Message, MessageRef};
use sidekick_core::ids::IdGenerator;
use sidekick_core::Result;
use sidekick_kv::KvStore;
use tokio_util::sync::CancellationToken;

/// Persists `msg`'s content blocks under the conventional key layout and
/// returns the resulting ref. The caller records `flow_id` at the container
/// level; this activity only needs it to build keys.
pub async fn append_message(
    cancel: &CancellationToken,
    kv: &dyn KvStore,
    ids: &dyn IdGenerator,
    flow_id: &str,
    workspace_id: &str,
    message_index: usize,
    msg: &Message,
) -> Result<MessageRef> {
    let mut values = BTreeMap::new();
    let mut block_ids = Vec::with_capacity(msg.content.len());
    for block in &msg.content {
        let id = ids.next_id();
        let key = MessageRef::key_for(flow_id, message_index, &id);
        values.insert(key, serde_json::to_vec(block)?);
        block_ids.push(id);
    }

    kv.mset_raw(cancel, workspace_id, values).await?;
    Ok(MessageRef { flow_id: flow_id.to_string(), role: msg.role.clone(), block_ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidekick_chat::{ContentBlock, Role};
    use sidekick_core::ids::SequentialIdGenerator;
    use sidekick_kv::InMemoryKvStore;

    #[tokio::test]
    async fn appends_one_block_per_content_entry() {
        let kv = InMemoryKvStore::new();
        let ids = SequentialIdGenerator::new("blk");
        let cancel = CancellationToken::new();

        let msg = Message::new(
            Role::User,
            vec![
                ContentBlock::Text { text: "a".to_string(), cache_control: None, context_type: None },
                ContentBlock::Text { text: "b".to_string(), cache_control: None, context_type: None },
            ],
        );

        let mref = append_message(&cancel, &kv, &ids, "flow1", "ws1", 0, &msg).await.unwrap();
        assert_eq!(mref.block_ids.len(), 2);

        let keys: Vec<String> =
            mref.block_ids.iter().map(|id| MessageRef::key_for("flow1", 0, id)).collect();
        let stored = kv.mget(&cancel, "ws1", &keys).await.unwrap();
        assert!(stored.iter().all(|v| v.is_some()));
    }
}
