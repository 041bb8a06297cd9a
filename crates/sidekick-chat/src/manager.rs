//! Chat History Manager: deterministic trimming policy (SPEC_FULL.md §4.C).

use std::collections::{BTreeSet, HashSet};

use regex::Regex;

use crate::block::{CacheControl, ContentBlock, ContextType, Message};
use crate::refs::MessageRef;

const TRUNCATED_MARKER: &str = "\n[truncated]";

/// Applies the retention-marker, integrity-repair, truncation, budget, and
/// cache-control breakpoint passes, in that order, and returns the trimmed
/// message list.
pub fn manage(messages: &[Message], budget_chars: usize, tool_result_ceiling_chars: usize) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let kept = drop_superseded_blocks(messages);
    let kept = integrity_repair(kept);
    let kept = truncate_oversized_tool_results(kept, tool_result_ceiling_chars);
    let mut kept = enforce_budget(kept, budget_chars);
    apply_cache_breakpoints(&mut kept);
    kept
}

/// Phase 1: assign each message to the retention block started by the
/// nearest preceding marked message, then drop every block whose marker is a
/// superseded type and is not that type's last occurrence.
fn drop_superseded_blocks(messages: &[Message]) -> Vec<Message> {
    let mut block_of = Vec::with_capacity(messages.len());
    let mut current_block: Option<usize> = None;
    let mut block_marker: Vec<Option<ContextType>> = Vec::new();

    for msg in messages {
        if let Some(ct) = msg.context_type() {
            block_marker.push(Some(ct));
            current_block = Some(block_marker.len() - 1);
        } else if current_block.is_none() {
            block_marker.push(None);
            current_block = Some(0);
        }
        block_of.push(current_block.unwrap());
    }

    let mut last_occurrence_of: std::collections::HashMap<ContextType, usize> = std::collections::HashMap::new();
    for (block_idx, marker) in block_marker.iter().enumerate() {
        if let Some(ct) = marker {
            if ct.is_superseded() {
                last_occurrence_of.insert(*ct, block_idx);
            }
        }
    }

    let last_index = messages.len().saturating_sub(1);
    messages
        .iter()
        .zip(block_of.iter())
        .enumerate()
        .filter(|(i, (_, &block_idx))| {
            if *i == last_index {
                return true;
            }
            match block_marker[block_idx] {
                Some(ct) if ct.is_superseded() => last_occurrence_of.get(&ct) == Some(&block_idx),
                _ => true,
            }
        })
        .map(|(_, (m, _))| m.clone())
        .collect()
}

/// Phase 2: drop tool-use/tool-result messages that have lost their pairing
/// partner, and protect edit-block proposals referenced by a surviving
/// report.
fn integrity_repair(messages: Vec<Message>) -> Vec<Message> {
    let retained_result_ids: HashSet<&str> =
        messages.iter().flat_map(Message::tool_result_ids).collect();
    let retained_use_ids: HashSet<&str> = messages.iter().flat_map(Message::tool_use_ids).collect();

    let edit_block_ids = referenced_edit_block_ids(&messages);
    let last_index = messages.len().saturating_sub(1);

    messages
        .into_iter()
        .enumerate()
        .filter(|(i, msg)| {
            if *i == last_index {
                return true;
            }
            let uses = msg.tool_use_ids();
            if !uses.is_empty() {
                return uses.iter().all(|id| retained_result_ids.contains(id));
            }
            let results = msg.tool_result_ids();
            if !results.is_empty() {
                return results.iter().all(|id| retained_use_ids.contains(id));
            }
            let _ = &edit_block_ids;
            true
        })
        .map(|(_, msg)| msg)
        .collect()
}

fn referenced_edit_block_ids(messages: &[Message]) -> HashSet<String> {
    let report_re = Regex::new(r"edit_block:(\d+)").expect("valid regex");
    let mut ids = HashSet::new();
    for msg in messages {
        if msg.context_type() == Some(ContextType::EditBlockReport) {
            for block in &msg.content {
                if let ContentBlock::Text { text, .. } = block {
                    for cap in report_re.captures_iter(text) {
                        ids.insert(cap[1].to_string());
                    }
                }
            }
        }
    }
    ids
}

/// Phase 3: shrink any retained tool-result whose text exceeds the ceiling,
/// oldest first, so recent results stay intact.
fn truncate_oversized_tool_results(messages: Vec<Message>, ceiling: usize) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut msg| {
            for block in &mut msg.content {
                if let ContentBlock::ToolResult { content, .. } = block {
                    for inner in content.iter_mut() {
                        if let ContentBlock::Text { text, .. } = inner {
                            if text.chars().count() > ceiling {
                                let head: String = text.chars().take(ceiling.saturating_sub(TRUNCATED_MARKER.len())).collect();
                                *text = format!("{head}{TRUNCATED_MARKER}");
                            }
                        }
                    }
                }
            }
            msg
        })
        .collect()
}

/// Phase 4: drop unretained messages oldest-first until the total fits.
/// Markers, the last message, and the last message's tool-use/tool-result
/// pair form a hard floor that is never dropped.
fn enforce_budget(messages: Vec<Message>, budget_chars: usize) -> Vec<Message> {
    if messages.is_empty() {
        return messages;
    }
    let last_index = messages.len() - 1;
    let mut hard_floor: BTreeSet<usize> = BTreeSet::new();
    hard_floor.insert(last_index);

    for (i, msg) in messages.iter().enumerate() {
        if let Some(ct) = msg.context_type() {
            if ct.is_always_kept() || ct.is_superseded() {
                hard_floor.insert(i);
            }
        }
    }

    let last_uses = messages[last_index].tool_use_ids();
    let last_results = messages[last_index].tool_result_ids();
    if !last_uses.is_empty() || !last_results.is_empty() {
        for (i, msg) in messages.iter().enumerate() {
            if i == last_index {
                continue;
            }
            if !last_uses.is_empty() && msg.tool_result_ids().iter().any(|id| last_uses.contains(id)) {
                hard_floor.insert(i);
            }
            if !last_results.is_empty() && msg.tool_use_ids().iter().any(|id| last_results.contains(id)) {
                hard_floor.insert(i);
            }
        }
    }

    let mut kept: Vec<Option<Message>> = messages.into_iter().map(Some).collect();
    let mut total: usize = kept.iter().flatten().map(Message::length).sum();

    let mut i = 0;
    while total > budget_chars && i < kept.len() {
        if hard_floor.contains(&i) || kept[i].is_none() {
            i += 1;
            continue;
        }
        if let Some(dropped) = kept[i].take() {
            total -= dropped.length();
        }
        i += 1;
    }

    kept.into_iter().flatten().collect()
}

/// Phase 5: after trimming, the first and last message get a fresh ephemeral
/// cache breakpoint; everything else is cleared.
fn apply_cache_breakpoints(messages: &mut [Message]) {
    for msg in messages.iter_mut() {
        msg.set_cache_control_all(None);
    }
    if let Some(first) = messages.first_mut() {
        first.set_cache_control_all(Some(CacheControl::Ephemeral));
    }
    if messages.len() > 1 {
        if let Some(last) = messages.last_mut() {
            last.set_cache_control_all(Some(CacheControl::Ephemeral));
        }
    }
}

/// Walks the trimmed list and reuses the original message's ref wherever a
/// deep-equal (modulo `cache_control`) match exists among not-yet-claimed
/// originals, newest first. Returns the refs to splice in and the indices
/// that still need persisting.
pub fn preserve_refs(
    original_messages: &[Message],
    original_refs: &[MessageRef],
    trimmed: &[Message],
) -> (Vec<MessageRef>, BTreeSet<usize>) {
    let mut claimed = vec![false; original_messages.len()];
    let mut refs = Vec::with_capacity(trimmed.len());
    let mut unpersisted = BTreeSet::new();

    for (new_index, msg) in trimmed.iter().enumerate() {
        let hash = msg.content_hash();
        let found = original_messages
            .iter()
            .enumerate()
            .rev()
            .find(|(i, original)| !claimed[*i] && original.content_hash() == hash);

        match found {
            Some((orig_index, _)) => {
                claimed[orig_index] = true;
                refs.push(original_refs[orig_index].clone());
            }
            None => {
                refs.push(MessageRef {
                    flow_id: original_refs.first().map(|r| r.flow_id.clone()).unwrap_or_default(),
                    role: msg.role.clone(),
                    block_ids: Vec::new(),
                });
                unpersisted.insert(new_index);
            }
        }
    }
    (refs, unpersisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Role;

    fn text_with(ct: Option<ContextType>, t: &str) -> ContentBlock {
        ContentBlock::Text { text: t.to_string(), cache_control: None, context_type: ct }
    }

    fn msg(role: Role, ct: Option<ContextType>, t: &str) -> Message {
        Message::new(role, vec![text_with(ct, t)])
    }

    #[test]
    fn keeps_markers_latest_superseded_and_last_message() {
        let messages = vec![
            msg(Role::System, Some(ContextType::InitialInstructions), "ii"),
            msg(Role::User, Some(ContextType::UserFeedback), "uf"),
            msg(Role::User, Some(ContextType::TestResult), "tr1"),
            msg(Role::User, Some(ContextType::TestResult), "tr2"),
            msg(Role::Assistant, None, "last"),
        ];

        let out = manage(&messages, 0, 8_000);
        let texts: Vec<&str> = out
            .iter()
            .map(|m| match &m.content[0] {
                ContentBlock::Text { text, .. } => text.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(texts, vec!["ii", "uf", "tr2", "last"]);
    }

    #[test]
    fn orphaned_tool_result_is_dropped() {
        let messages = vec![
            Message::new(
                Role::Tool,
                vec![ContentBlock::ToolResult {
                    tool_call_id: "missing".to_string(),
                    is_error: None,
                    content: vec![text_with(None, "result")],
                    cache_control: None,
                    context_type: None,
                }],
            ),
            msg(Role::Assistant, None, "last"),
        ];
        let out = manage(&messages, 10_000, 8_000);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn paired_tool_use_and_result_survive_budget_trim_when_last() {
        let messages = vec![
            msg(Role::User, None, "old filler that should get dropped for budget"),
            Message::new(
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "call1".to_string(),
                    name: "run".to_string(),
                    arguments: serde_json::json!({}),
                    cache_control: None,
                    context_type: None,
                }],
            ),
            Message::new(
                Role::Tool,
                vec![ContentBlock::ToolResult {
                    tool_call_id: "call1".to_string(),
                    is_error: None,
                    content: vec![text_with(None, "ok")],
                    cache_control: None,
                    context_type: None,
                }],
            ),
        ];
        let out = manage(&messages, 5, 8_000);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn first_and_last_get_ephemeral_breakpoint() {
        let messages =
            vec![msg(Role::User, None, "a"), msg(Role::User, None, "b"), msg(Role::User, None, "c")];
        let out = manage(&messages, 10_000, 8_000);
        assert_eq!(out[0].content[0].cache_control(), Some(CacheControl::Ephemeral));
        assert_eq!(out[2].content[0].cache_control(), Some(CacheControl::Ephemeral));
        assert_eq!(out[1].content[0].cache_control(), None);
    }

    #[test]
    fn preserve_refs_reuses_ref_for_byte_identical_message() {
        let original = vec![msg(Role::User, None, "same"), msg(Role::Assistant, None, "changed")];
        let refs = vec![
            MessageRef { flow_id: "f1".to_string(), role: Role::User, block_ids: vec!["b1".to_string()] },
            MessageRef { flow_id: "f1".to_string(), role: Role::Assistant, block_ids: vec!["b2".to_string()] },
        ];
        let trimmed = vec![msg(Role::User, None, "same"), msg(Role::Assistant, None, "edited")];

        let (new_refs, unpersisted) = preserve_refs(&original, &refs, &trimmed);
        assert_eq!(new_refs[0].block_ids, vec!["b1".to_string()]);
        assert!(unpersisted.contains(&1));
        assert!(!unpersisted.contains(&0));
    }
}
