//! Content blocks and messages (SPEC_FULL.md §3, §4.B).

use serde::{Deserialize, Serialize};

/// Marks a breakpoint eligible for provider-side prompt caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControl {
    Ephemeral,
}

/// Retention marker carried by a content block. Drives the Manager's
/// drop/keep decisions; unrelated to wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    InitialInstructions,
    UserFeedback,
    TestResult,
    SelfReviewFeedback,
    Summary,
    EditBlockReport,
}

impl ContextType {
    /// Superseded types: only the latest occurrence of each is kept.
    pub fn is_superseded(self) -> bool {
        matches!(
            self,
            ContextType::TestResult
                | ContextType::SelfReviewFeedback
                | ContextType::Summary
                | ContextType::EditBlockReport
        )
    }

    /// Always-kept regardless of budget.
    pub fn is_always_kept(self) -> bool {
        matches!(self, ContextType::InitialInstructions | ContextType::UserFeedback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// A tool-result message. Some wire formats (OpenAI) require tool
    /// results as a standalone `tool`-role message; others (Anthropic)
    /// embed them in the next user turn instead — provider mapping code
    /// decides how to fold this role into its own wire format.
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_type: Option<ContextType>,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_type: Option<ContextType>,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        content: Vec<ContentBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_type: Option<ContextType>,
    },
    Image {
        /// Either a remote URL or a `data:` URI.
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_type: Option<ContextType>,
    },
    File {
        url: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_type: Option<ContextType>,
    },
}

impl ContentBlock {
    pub fn cache_control(&self) -> Option<CacheControl> {
        match self {
            ContentBlock::Text { cache_control, .. }
            | ContentBlock::ToolUse { cache_control, .. }
            | ContentBlock::ToolResult { cache_control, .. }
            | ContentBlock::Image { cache_control, .. }
            | ContentBlock::File { cache_control, .. } => *cache_control,
        }
    }

    pub fn set_cache_control(&mut self, value: Option<CacheControl>) {
        match self {
            ContentBlock::Text { cache_control, .. }
            | ContentBlock::ToolUse { cache_control, .. }
            | ContentBlock::ToolResult { cache_control, .. }
            | ContentBlock::Image { cache_control, .. }
            | ContentBlock::File { cache_control, .. } => *cache_control = value,
        }
    }

    pub fn context_type(&self) -> Option<ContextType> {
        match self {
            ContentBlock::Text { context_type, .. }
            | ContentBlock::ToolUse { context_type, .. }
            | ContentBlock::ToolResult { context_type, .. }
            | ContentBlock::Image { context_type, .. }
            | ContentBlock::File { context_type, .. } => *context_type,
        }
    }

    /// Character length as counted toward budgets: text length for text
    /// blocks, recursive sum for tool-results, a flat estimate for
    /// attachments. See SPEC_FULL.md §3 "Length".
    pub fn length(&self) -> usize {
        match self {
            ContentBlock::Text { text, .. } => text.chars().count(),
            ContentBlock::ToolUse { arguments, .. } => {
                serde_json::to_string(arguments).map(|s| s.chars().count()).unwrap_or(0)
            }
            ContentBlock::ToolResult { content, .. } => content.iter().map(ContentBlock::length).sum(),
            ContentBlock::Image { .. } => 0,
            ContentBlock::File { name, .. } => name.chars().count(),
        }
    }

    /// Without the cache_control field, used for ref-preservation hashing.
    fn canonicalized(&self) -> ContentBlock {
        let mut clone = self.clone();
        clone.set_cache_control(None);
        if let ContentBlock::ToolResult { content, .. } = &mut clone {
            *content = content.iter().map(ContentBlock::canonicalized).collect();
        }
        clone
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn length(&self) -> usize {
        self.content.iter().map(ContentBlock::length).sum()
    }

    /// The message's retention marker: the first block carrying one, if any.
    pub fn context_type(&self) -> Option<ContextType> {
        self.content.iter().find_map(ContentBlock::context_type)
    }

    pub fn set_cache_control_all(&mut self, value: Option<CacheControl>) {
        for block in &mut self.content {
            block.set_cache_control(value);
        }
    }

    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// SHA-256 over a canonical encoding with `cache_control` stripped from
    /// every block. Used to detect "same content, different cache marker"
    /// when deciding whether a persisted ref can be reused.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let canon: Vec<ContentBlock> = self.content.iter().map(ContentBlock::canonicalized).collect();
        let bytes = serde_json::to_vec(&(&self.role, &canon)).expect("content blocks always serialize");
        let digest = Sha256::digest(&bytes);
        hex::encode(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> ContentBlock {
        ContentBlock::Text { text: t.to_string(), cache_control: None, context_type: None }
    }

    #[test]
    fn content_hash_ignores_cache_control_but_not_text() {
        let mut a = Message::new(Role::User, vec![text("hi")]);
        let mut b = a.clone();
        b.set_cache_control_all(Some(CacheControl::Ephemeral));
        assert_eq!(a.content_hash(), b.content_hash());

        a.content[0] = text("bye");
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn tool_result_length_is_recursive() {
        let msg = Message::new(
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_call_id: "t1".to_string(),
                is_error: None,
                content: vec![text("abcde")],
                cache_control: None,
                context_type: None,
            }],
        );
        assert_eq!(msg.length(), 5);
    }
}
