//! Conversation message types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One entry in a conversation, with free-form per-request metadata.
///
/// Metadata keys recognized by the reply loop: `llm_provider`, `llm_model`,
/// `model_route`, `browser_mode`, `browser_interaction`,
/// `browser_domain_allowlist`, `browser_preferred_browser`,
/// `browser_user_agent`, `embedding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub sequence: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn system(content: impl Into<String>, sequence: u64) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            sequence,
            metadata: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>, sequence: u64) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            sequence,
            metadata: HashMap::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, sequence: u64) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            sequence,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role() {
        assert_eq!(Message::system("s", 0).role, MessageRole::System);
        assert_eq!(Message::user("u", 1).role, MessageRole::User);
        assert_eq!(Message::assistant("a", 2).role, MessageRole::Assistant);
    }

    #[test]
    fn metadata_roundtrips() {
        let m = Message::user("hi", 0).with_metadata("llm_provider", serde_json::json!("openai"));
        assert_eq!(m.metadata_str("llm_provider"), Some("openai"));
    }
}
