//! Bounds the message list fed to the LLM by count and total character
//! length, always preserving the leading system-prompt prefix.

use crate::message::{Message, MessageRole};

/// Clamps `messages` to at most `max_messages` tail entries whose combined
/// content length is at most `max_chars`, after the leading run of
/// `system`-role messages. The leading system prefix is always kept intact.
/// At least one tail message is kept if the tail is non-empty, even if it
/// alone exceeds `max_chars`.
pub fn clamp(messages: &[Message], max_messages: usize, max_chars: usize) -> Vec<Message> {
    let split = messages
        .iter()
        .position(|m| m.role != MessageRole::System)
        .unwrap_or(messages.len());
    let (prefix, tail) = messages.split_at(split);

    let mut kept: Vec<&Message> = Vec::new();
    let mut total_chars = 0usize;
    for message in tail.iter().rev() {
        if !kept.is_empty() {
            if kept.len() >= max_messages {
                break;
            }
            if total_chars + message.content.len() > max_chars {
                break;
            }
        }
        total_chars += message.content.len();
        kept.push(message);
    }
    kept.reverse();

    prefix
        .iter()
        .cloned()
        .chain(kept.into_iter().cloned())
        .collect()
}
