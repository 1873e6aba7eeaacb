//! Keeps the conversation sent to the completion service under a character ceiling.
//!
//! Sizes are estimates: text counts its characters, an image counts as
//! [`IMAGE_CHAR_ESTIMATE`], a tool-use counts its serialized input.

use crate::providers::{ChatMessage, ChatRole, ContentBlock, MessagePart, ToolResultContent};

pub const MAX_CONVERSATION_CHARS: usize = 400_000;

const IMAGE_TOKEN_ESTIMATE: usize = 2_000;
pub const IMAGE_CHAR_ESTIMATE: usize = IMAGE_TOKEN_ESTIMATE * 4;

/// Tool-result text longer than this is dropped when its message is pruned.
const LONG_RESULT_CHARS: usize = 200;
const SUMMARY_CHARS: usize = 100;

/// Number of trailing block-content user messages whose images are kept.
const KEEP_RECENT_IMAGES: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_messages: usize,
    pub images_demoted: usize,
    pub chars_before: usize,
    pub chars_after: usize,
}

impl PruneReport {
    pub fn changed(&self) -> bool {
        self.removed_messages > 0 || self.chars_before != self.chars_after
    }
}

pub fn estimate_chars(message: &ChatMessage) -> usize {
    match &message.content {
        MessagePart::Text(text) => text.chars().count(),
        MessagePart::Parts(blocks) => blocks.iter().map(block_chars).sum(),
    }
}

fn block_chars(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => text.chars().count(),
        ContentBlock::Image { .. } => IMAGE_CHAR_ESTIMATE,
        ContentBlock::ToolUse { input, .. } => input.to_string().chars().count(),
        ContentBlock::ToolResult { content, .. } => match content {
            ToolResultContent::Text(text) => text.chars().count(),
            ToolResultContent::TextWithImage { text, .. } => {
                text.chars().count() + IMAGE_CHAR_ESTIMATE
            }
        },
    }
}

pub fn total_chars(conversation: &[ChatMessage]) -> usize {
    conversation.iter().map(estimate_chars).sum()
}

/// Shrink one tool-result block. Returns whether anything changed.
fn prune_tool_result(block: &mut ContentBlock) -> bool {
    let ContentBlock::ToolResult { content, .. } = block else {
        return false;
    };
    let replacement = match content {
        ToolResultContent::TextWithImage { text, .. } => {
            let summary: String = text.chars().take(SUMMARY_CHARS).collect();
            format!("[pruned: {summary}]")
        }
        ToolResultContent::Text(text) if text.chars().count() > LONG_RESULT_CHARS => {
            "[pruned from history]".to_string()
        }
        ToolResultContent::Text(_) => return false,
    };
    *content = ToolResultContent::Text(replacement);
    true
}

fn prune_tool_results(message: &mut ChatMessage) -> bool {
    let MessagePart::Parts(blocks) = &mut message.content else {
        return false;
    };
    let mut changed = false;
    for block in blocks.iter_mut() {
        changed |= prune_tool_result(block);
    }
    changed
}

fn has_image_results(message: &ChatMessage) -> bool {
    match &message.content {
        MessagePart::Parts(blocks) => blocks.iter().any(|b| {
            matches!(b, ContentBlock::ToolResult { content, .. } if content.has_image())
        }),
        MessagePart::Text(_) => false,
    }
}

fn count_image_results(message: &ChatMessage) -> usize {
    match &message.content {
        MessagePart::Parts(blocks) => blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolResult { content, .. } if content.has_image()))
            .count(),
        MessagePart::Text(_) => 0,
    }
}

/// Tool results at the head have lost their tool-use turn; keep their text as plain text.
fn repair_orphaned_results(conversation: &mut [ChatMessage]) {
    let Some(head) = conversation.first_mut() else {
        return;
    };
    if head.role != ChatRole::User {
        return;
    }
    let MessagePart::Parts(blocks) = &mut head.content else {
        return;
    };
    for block in blocks.iter_mut() {
        if let ContentBlock::ToolResult { content, .. } = block {
            *block = ContentBlock::Text {
                text: content.text().to_string(),
            };
        }
    }
}

/// Demote stale screenshots, then evict oldest-first until under `max_chars`.
///
/// Never fails. Alternation is preserved: eviction always leaves a user turn at the head.
pub fn prune_conversation(conversation: &mut Vec<ChatMessage>, max_chars: usize) -> PruneReport {
    let chars_before = total_chars(conversation);
    let len_before = conversation.len();
    let mut images_demoted = 0;

    let block_user_indices: Vec<usize> = conversation
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == ChatRole::User && matches!(m.content, MessagePart::Parts(_)))
        .map(|(i, _)| i)
        .collect();
    let stale = block_user_indices.len().saturating_sub(KEEP_RECENT_IMAGES);
    for &idx in &block_user_indices[..stale] {
        let message = &mut conversation[idx];
        if has_image_results(message) {
            images_demoted += count_image_results(message);
            prune_tool_results(message);
        }
    }

    let mut evicted = false;
    while conversation.len() > 2 && total_chars(conversation) > max_chars {
        if prune_tool_results(&mut conversation[0]) {
            continue;
        }
        conversation.remove(0);
        evicted = true;
        if conversation
            .first()
            .is_some_and(|m| m.role == ChatRole::Assistant)
        {
            conversation.remove(0);
        }
    }
    if evicted {
        repair_orphaned_results(conversation);
    }

    PruneReport {
        removed_messages: len_before - conversation.len(),
        images_demoted,
        chars_before,
        chars_after: total_chars(conversation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ImageData;
    use serde_json::json;

    fn screenshot_result(id: &str, text: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.into(),
            content: ToolResultContent::TextWithImage {
                text: text.into(),
                image: ImageData {
                    media_type: "image/png".into(),
                    base64: "iVBORw0KGgo".into(),
                },
            },
            is_error: false,
        }
    }

    fn text_result(id: &str, text: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.into(),
            content: ToolResultContent::Text(text.into()),
            is_error: false,
        }
    }

    fn tool_use(id: &str) -> ChatMessage {
        ChatMessage::assistant(vec![ContentBlock::ToolUse {
            id: id.into(),
            name: "browser".into(),
            input: json!({"command": "screenshot"}),
        }])
    }

    fn assert_alternates(conversation: &[ChatMessage]) {
        if let Some(first) = conversation.first() {
            assert_eq!(first.role, ChatRole::User, "head must be a user turn");
        }
        for pair in conversation.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "roles must alternate");
        }
    }

    fn assert_results_follow_uses(conversation: &[ChatMessage]) {
        for (i, message) in conversation.iter().enumerate() {
            let MessagePart::Parts(blocks) = &message.content else {
                continue;
            };
            for block in blocks {
                let ContentBlock::ToolResult { tool_use_id, .. } = block else {
                    continue;
                };
                assert!(i > 0, "tool result at head");
                let MessagePart::Parts(prev) = &conversation[i - 1].content else {
                    panic!("tool result without preceding tool use");
                };
                assert!(prev.iter().any(
                    |b| matches!(b, ContentBlock::ToolUse { id, .. } if id == tool_use_id)
                ));
            }
        }
    }

    /// user text, then `rounds` of (assistant tool use, user tool result), each result `size` chars.
    fn conversation_with_rounds(rounds: usize, size: usize, images: bool) -> Vec<ChatMessage> {
        let mut conversation = vec![ChatMessage::user("hello")];
        for r in 0..rounds {
            let id = format!("tu_{r}");
            conversation.push(tool_use(&id));
            let text = "x".repeat(size);
            let block = if images {
                screenshot_result(&id, &text)
            } else {
                text_result(&id, &text)
            };
            conversation.push(ChatMessage::tool_results(vec![block]));
        }
        conversation
    }

    #[test]
    fn under_budget_conversation_is_untouched() {
        let mut conversation = conversation_with_rounds(2, 50, true);
        let before = conversation.clone();

        let report = prune_conversation(&mut conversation, MAX_CONVERSATION_CHARS);

        assert_eq!(conversation, before);
        assert!(!report.changed());
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut conversation = conversation_with_rounds(6, 30_000, true);
        prune_conversation(&mut conversation, 100_000);
        let after_first = conversation.clone();

        let report = prune_conversation(&mut conversation, 100_000);

        assert_eq!(conversation, after_first);
        assert!(!report.changed());
    }

    #[test]
    fn demotes_all_but_two_most_recent_screenshots() {
        let mut conversation = conversation_with_rounds(4, 150, true);

        let report = prune_conversation(&mut conversation, MAX_CONVERSATION_CHARS);

        assert_eq!(report.images_demoted, 2);
        assert_eq!(report.removed_messages, 0);
        let images: Vec<bool> = conversation
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .map(has_image_results)
            .collect();
        assert_eq!(images, vec![false, false, false, true, true]);

        let MessagePart::Parts(blocks) = &conversation[2].content else {
            panic!("expected blocks");
        };
        let ContentBlock::ToolResult { content, .. } = &blocks[0] else {
            panic!("expected tool result");
        };
        assert_eq!(content.text(), format!("[pruned: {}]", "x".repeat(100)));
    }

    #[test]
    fn evicts_oldest_until_under_ceiling() {
        let mut conversation = conversation_with_rounds(10, 1_000, false);
        for _ in 0..3 {
            conversation.push(ChatMessage::assistant(vec![ContentBlock::Text {
                text: "y".repeat(50_000),
            }]));
            conversation.push(ChatMessage::user("z".repeat(50_000)));
        }

        let report = prune_conversation(&mut conversation, 120_000);

        assert!(report.removed_messages > 0);
        assert!(report.chars_after <= 120_000);
        assert!(report.chars_before > report.chars_after);
        assert_alternates(&conversation);
        assert_results_follow_uses(&conversation);
    }

    #[test]
    fn long_text_results_are_pruned_before_eviction() {
        let mut conversation = vec![
            ChatMessage::tool_results(vec![text_result("a", &"r".repeat(5_000))]),
            ChatMessage::assistant(vec![ContentBlock::Text { text: "ok".into() }]),
            ChatMessage::user("next"),
        ];

        let report = prune_conversation(&mut conversation, 1_000);

        assert_eq!(report.removed_messages, 0);
        let MessagePart::Parts(blocks) = &conversation[0].content else {
            panic!("expected blocks");
        };
        let ContentBlock::ToolResult { content, .. } = &blocks[0] else {
            panic!("expected tool result");
        };
        assert_eq!(content.text(), "[pruned from history]");
    }

    #[test]
    fn orphaned_results_at_head_become_text() {
        let mut conversation = vec![
            ChatMessage::user("u".repeat(2_000)),
            tool_use("t1"),
            ChatMessage::tool_results(vec![text_result("t1", "small")]),
            ChatMessage::assistant(vec![ContentBlock::Text { text: "done".into() }]),
            ChatMessage::user("again"),
        ];

        prune_conversation(&mut conversation, 500);

        assert_alternates(&conversation);
        assert_results_follow_uses(&conversation);
        assert_eq!(
            conversation[0].content,
            MessagePart::Parts(vec![ContentBlock::Text {
                text: "small".into()
            }])
        );
    }

    #[test]
    fn never_drops_below_two_messages() {
        let mut conversation = vec![
            ChatMessage::user("a".repeat(10_000)),
            ChatMessage::assistant(vec![ContentBlock::Text {
                text: "b".repeat(10_000),
            }]),
        ];
        let report = prune_conversation(&mut conversation, 10);
        assert_eq!(conversation.len(), 2);
        assert_eq!(report.removed_messages, 0);
    }

    #[test]
    fn alternation_holds_across_many_shapes() {
        for rounds in 0..12 {
            for size in [10, 900, 4_000, 25_000] {
                for images in [false, true] {
                    for budget in [1_000, 20_000, 60_000, MAX_CONVERSATION_CHARS] {
                        let mut conversation = conversation_with_rounds(rounds, size, images);
                        conversation.push(tool_use("last"));
                        conversation.push(ChatMessage::user("follow-up"));

                        prune_conversation(&mut conversation, budget);

                        assert_alternates(&conversation);
                        assert_results_follow_uses(&conversation);
                        assert!(!conversation.is_empty());
                    }
                }
            }
        }
    }
}
