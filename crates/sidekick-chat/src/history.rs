//! Chat history containers (SPEC_FULL.md §4.B): ref-backed and legacy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sidekick_core::error::CoreError;
use sidekick_core::ids::IdGenerator;
use sidekick_core::Result;
use sidekick_kv::KvStore;
use tokio_util::sync::CancellationToken;

use crate::block::Message;
use crate::refs::MessageRef;

fn unhydrated() -> CoreError {
    CoreError::Arg("chat history accessed before hydrate".to_string())
}

/// Common surface both history variants expose to callers. Not every method
/// needs `async`, but hydrate/persist do, so the trait as a whole is async.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    fn append(&mut self, msg: Message) -> Result<()>;
    fn get(&self, index: usize) -> Result<&Message>;
    fn set(&mut self, index: usize, msg: Message) -> Result<()>;
    fn len(&self) -> Result<usize>;
    fn messages(&self) -> Result<&[Message]>;
    fn serialize(&self) -> Result<Vec<u8>>;

    async fn hydrate(&mut self, cancel: &CancellationToken, kv: &dyn KvStore) -> Result<()>;
    async fn persist(
        &mut self,
        cancel: &CancellationToken,
        kv: &dyn KvStore,
        ids: &dyn IdGenerator,
    ) -> Result<()>;
}

/// Ref-backed history: workflow state holds only `refs`; content blocks live
/// in the KV store.
#[derive(Debug, Clone, Default)]
pub struct RefBackedChatHistory {
    flow_id: String,
    workspace_id: String,
    refs: Vec<MessageRef>,
    messages: Vec<Message>,
    hydrated: bool,
    unpersisted: std::collections::BTreeSet<usize>,
}

#[derive(Serialize, Deserialize)]
struct RefBackedDto {
    flow_id: String,
    workspace_id: String,
    refs: Vec<MessageRef>,
}

impl RefBackedChatHistory {
    pub fn new(flow_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            workspace_id: workspace_id.into(),
            refs: Vec::new(),
            messages: Vec::new(),
            hydrated: true,
            unpersisted: std::collections::BTreeSet::new(),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn refs(&self) -> &[MessageRef] {
        &self.refs
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn unpersisted(&self) -> &std::collections::BTreeSet<usize> {
        &self.unpersisted
    }

    /// Replaces all messages, resets refs and marks every index unpersisted.
    /// Used after a trim where the Manager has not yet computed preserved
    /// refs.
    pub fn set_messages(&mut self, msgs: Vec<Message>) {
        self.refs = msgs
            .iter()
            .map(|m| MessageRef { flow_id: self.flow_id.clone(), role: m.role.clone(), block_ids: Vec::new() })
            .collect();
        self.unpersisted = (0..msgs.len()).collect();
        self.messages = msgs;
        self.hydrated = true;
    }

    /// Splices Manager-computed refs back in without touching `messages`.
    pub fn set_refs(&mut self, refs: Vec<MessageRef>) {
        self.refs = refs;
    }

    pub fn set_hydrated_with_messages(&mut self, msgs: Vec<Message>) {
        self.messages = msgs;
        self.hydrated = true;
    }

    pub fn set_unpersisted(&mut self, indices: std::collections::BTreeSet<usize>) {
        self.unpersisted = indices;
    }

    fn require_hydrated(&self) -> Result<()> {
        if !self.hydrated {
            return Err(unhydrated());
        }
        Ok(())
    }
}

#[async_trait]
impl ChatHistory for RefBackedChatHistory {
    fn append(&mut self, msg: Message) -> Result<()> {
        self.require_hydrated()?;
        self.messages.push(msg);
        self.refs.push(MessageRef {
            flow_id: self.flow_id.clone(),
            role: self.messages.last().unwrap().role.clone(),
            block_ids: Vec::new(),
        });
        self.unpersisted.insert(self.messages.len() - 1);
        Ok(())
    }

    fn get(&self, index: usize) -> Result<&Message> {
        self.require_hydrated()?;
        self.messages
            .get(index)
            .ok_or_else(|| CoreError::Arg(format!("message index {index} out of range")))
    }

    fn set(&mut self, index: usize, msg: Message) -> Result<()> {
        self.require_hydrated()?;
        if index >= self.messages.len() {
            return Err(CoreError::Arg(format!("message index {index} out of range")));
        }
        self.messages[index] = msg;
        self.unpersisted.insert(index);
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        self.require_hydrated()?;
        Ok(self.messages.len())
    }

    fn messages(&self) -> Result<&[Message]> {
        self.require_hydrated()?;
        Ok(&self.messages)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let dto = RefBackedDto {
            flow_id: self.flow_id.clone(),
            workspace_id: self.workspace_id.clone(),
            refs: self.refs.clone(),
        };
        Ok(serde_json::to_vec(&dto)?)
    }

    async fn hydrate(&mut self, cancel: &CancellationToken, kv: &dyn KvStore) -> Result<()> {
        if self.hydrated {
            return Ok(());
        }
        let mut keys = Vec::new();
        let mut spans = Vec::with_capacity(self.refs.len());
        for r in &self.refs {
            spans.push(r.block_ids.len());
            for id in &r.block_ids {
                keys.push(MessageRef::key_for(&self.flow_id, spans.len() - 1, id));
            }
        }
        let raw = kv.mget(cancel, &self.workspace_id, &keys).await?;

        let mut messages = Vec::with_capacity(self.refs.len());
        let mut cursor = 0usize;
        for r in &self.refs {
            let mut content = Vec::with_capacity(r.block_ids.len());
            for _ in &r.block_ids {
                let bytes = raw[cursor]
                    .as_ref()
                    .ok_or_else(|| CoreError::Decode("missing content block referenced by ref".to_string()))?;
                content.push(serde_json::from_slice(bytes)?);
                cursor += 1;
            }
            messages.push(Message { role: r.role.clone(), content });
        }
        if self.flow_id.is_empty() {
            if let Some(first) = self.refs.first() {
                self.flow_id = first.flow_id.clone();
            }
        }
        self.messages = messages;
        self.hydrated = true;
        Ok(())
    }

    async fn persist(
        &mut self,
        cancel: &CancellationToken,
        kv: &dyn KvStore,
        ids: &dyn IdGenerator,
    ) -> Result<()> {
        let indices: Vec<usize> = self.unpersisted.iter().copied().collect();
        for index in indices {
            let msg = self.messages.get(index).ok_or_else(|| {
                CoreError::Arg(format!("unpersisted index {index} has no matching message"))
            })?;
            let mut values = BTreeMap::new();
            let mut block_ids = Vec::with_capacity(msg.content.len());
            for block in &msg.content {
                let id = ids.next_id();
                let key = MessageRef::key_for(&self.flow_id, index, &id);
                values.insert(key, serde_json::to_vec(block)?);
                block_ids.push(id);
            }
            kv.mset_raw(cancel, &self.workspace_id, values).await?;

            if index < self.refs.len() {
                self.refs[index] = MessageRef { flow_id: self.flow_id.clone(), role: msg.role.clone(), block_ids };
            } else {
                self.refs.push(MessageRef { flow_id: self.flow_id.clone(), role: msg.role.clone(), block_ids });
            }
            self.unpersisted.remove(&index);
        }
        Ok(())
    }
}

/// Back-compat variant: messages stored inline, no KV indirection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyChatHistory {
    messages: Vec<Message>,
}

impl LegacyChatHistory {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl ChatHistory for LegacyChatHistory {
    fn append(&mut self, msg: Message) -> Result<()> {
        self.messages.push(msg);
        Ok(())
    }

    fn get(&self, index: usize) -> Result<&Message> {
        self.messages
            .get(index)
            .ok_or_else(|| CoreError::Arg(format!("message index {index} out of range")))
    }

    fn set(&mut self, index: usize, msg: Message) -> Result<()> {
        if index >= self.messages.len() {
            return Err(CoreError::Arg(format!("message index {index} out of range")));
        }
        self.messages[index] = msg;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.messages.len())
    }

    fn messages(&self) -> Result<&[Message]> {
        Ok(&self.messages)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    async fn hydrate(&mut self, _cancel: &CancellationToken, _kv: &dyn KvStore) -> Result<()> {
        Ok(())
    }

    async fn persist(
        &mut self,
        _cancel: &CancellationToken,
        _kv: &dyn KvStore,
        _ids: &dyn IdGenerator,
    ) -> Result<()> {
        Ok(())
    }
}

/// Tagged union the container (de)serializes; picks the variant a stored
/// payload decodes as so pre-migration flows keep replaying.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ContainerDto {
    RefBacked(RefBackedDto),
    Legacy { messages: Vec<Message> },
}

pub enum ChatHistoryContainer {
    RefBacked(RefBackedChatHistory),
    Legacy(LegacyChatHistory),
}

impl ChatHistoryContainer {
    pub fn new_ref_backed(flow_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        ChatHistoryContainer::RefBacked(RefBackedChatHistory::new(flow_id, workspace_id))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let dto: ContainerDto = serde_json::from_slice(bytes)?;
        Ok(match dto {
            ContainerDto::RefBacked(r) => ChatHistoryContainer::RefBacked(RefBackedChatHistory {
                flow_id: r.flow_id,
                workspace_id: r.workspace_id,
                refs: r.refs,
                messages: Vec::new(),
                hydrated: false,
                unpersisted: std::collections::BTreeSet::new(),
            }),
            ContainerDto::Legacy { messages } => ChatHistoryContainer::Legacy(LegacyChatHistory { messages }),
        })
    }

    pub fn as_chat_history(&self) -> &dyn ChatHistory {
        match self {
            ChatHistoryContainer::RefBacked(h) => h,
            ChatHistoryContainer::Legacy(h) => h,
        }
    }

    pub fn as_chat_history_mut(&mut self) -> &mut dyn ChatHistory {
        match self {
            ChatHistoryContainer::RefBacked(h) => h,
            ChatHistoryContainer::Legacy(h) => h,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            ChatHistoryContainer::RefBacked(h) => {
                let dto = ContainerDto::RefBacked(RefBackedDto {
                    flow_id: h.flow_id.clone(),
                    workspace_id: h.workspace_id.clone(),
                    refs: h.refs.clone(),
                });
                Ok(serde_json::to_vec(&dto)?)
            }
            ChatHistoryContainer::Legacy(h) => {
                let dto = ContainerDto::Legacy { messages: h.messages.clone() };
                Ok(serde_json::to_vec(&dto)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ContentBlock, Role};
    use sidekick_core::ids::SequentialIdGenerator;
    use sidekick_kv::InMemoryKvStore;

    fn text(t: &str) -> ContentBlock {
        ContentBlock::Text { text: t.to_string(), cache_control: None, context_type: None }
    }

    #[tokio::test]
    async fn persist_then_hydrate_round_trips() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let gen = SequentialIdGenerator::new("blk");

        let mut history = RefBackedChatHistory::new("flow1", "ws1");
        history.append(Message::new(Role::User, vec![text("hello")])).unwrap();
        history.persist(&cancel, &kv, &gen).await.unwrap();
        assert!(history.unpersisted().is_empty());

        let bytes = history.serialize().unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("hello"));

        let mut container = ChatHistoryContainer::deserialize(&bytes).unwrap();
        let reloaded = match &mut container {
            ChatHistoryContainer::RefBacked(h) => h,
            _ => panic!("expected ref-backed"),
        };
        reloaded.hydrate(&cancel, &kv).await.unwrap();
        assert_eq!(reloaded.messages().unwrap()[0].content[0], text("hello"));
    }

    #[test]
    fn unhydrated_access_is_an_error() {
        let mut h = RefBackedChatHistory::new("flow1", "ws1");
        h.hydrated = false;
        assert!(h.len().is_err());
        assert!(h.append(Message::new(Role::User, vec![text("x")])).is_err());
    }

    #[test]
    fn legacy_history_round_trips_via_container() {
        let legacy = LegacyChatHistory::new(vec![Message::new(Role::User, vec![text("hi")])]);
        let container = ChatHistoryContainer::Legacy(legacy);
        let bytes = container.serialize().unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("hi"));

        let decoded = ChatHistoryContainer::deserialize(&bytes).unwrap();
        assert!(matches!(decoded, ChatHistoryContainer::Legacy(_)));
    }
}
