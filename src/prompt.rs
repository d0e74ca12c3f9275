//! Pluggable system/memory prompt construction.
//!
//! The core owns the reply loop but not prompt policy: what goes into the
//! system prompt (current date, tool-runner status, the allowed tool list)
//! and how prior turns get summarized into a memory prompt are supplied by
//! the embedding application, injected the same way `LLMProvider`/`Memory`
//! are.

use crate::message::Message;

/// Builds the system prompt injected ahead of every generation request.
pub trait SystemPromptBuilder: Send + Sync {
    fn build(&self) -> String;
}

/// Builds a memory/context summary prompt from the messages seen so far
/// this turn.
pub trait MemoryPromptBuilder: Send + Sync {
    fn build(&self, messages: &[Message]) -> String;
}

/// Supplies no prompt; the default when the embedding application hasn't
/// configured prompt construction.
pub struct NoopSystemPromptBuilder;

impl SystemPromptBuilder for NoopSystemPromptBuilder {
    fn build(&self) -> String {
        String::new()
    }
}

/// Supplies no memory prompt; pairs with [`NoopSystemPromptBuilder`].
pub struct NoopMemoryPromptBuilder;

impl MemoryPromptBuilder for NoopMemoryPromptBuilder {
    fn build(&self, _messages: &[Message]) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_builders_produce_empty_prompts() {
        assert_eq!(NoopSystemPromptBuilder.build(), "");
        assert_eq!(NoopMemoryPromptBuilder.build(&[]), "");
    }
}
