//! Derives whether a user turn requires web research and how many sources
//! are expected.

use std::sync::LazyLock;

use regex::Regex;

const TOOL_INTENT_KEYWORDS: &[&str] = &["browse", "search", "research", "news", "find"];
const RESEARCH_INTENT_KEYWORDS: &[&str] = &["browse", "search", "research", "news", "source", "link"];

static TOP_N_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btop\s+(\d{1,2})\b").expect("static regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebResearchRequirements {
    pub enabled: bool,
    pub minimum_items: usize,
}

impl Default for WebResearchRequirements {
    fn default() -> Self {
        Self {
            enabled: false,
            minimum_items: 3,
        }
    }
}

/// Derives research requirements from the latest user message.
pub fn derive(user_message: &str) -> WebResearchRequirements {
    let lowered = user_message.to_lowercase();
    let has_tool_intent = TOOL_INTENT_KEYWORDS.iter().any(|k| lowered.contains(k));
    let has_research_intent = RESEARCH_INTENT_KEYWORDS.iter().any(|k| lowered.contains(k));
    let enabled = has_tool_intent && has_research_intent;

    let mut minimum_items = 3;
    if let Some(captures) = TOP_N_RE.captures(&lowered) {
        if let Ok(n) = captures[1].parse::<usize>() {
            minimum_items = n.clamp(3, 8);
        }
    }

    WebResearchRequirements { enabled, minimum_items }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_chat_does_not_require_research() {
        let reqs = derive("Explain pointer aliasing");
        assert!(!reqs.enabled);
    }

    #[test]
    fn browse_and_source_keywords_enable_research() {
        let reqs = derive("Browse the web and give me sources for the top 5 RWA news");
        assert!(reqs.enabled);
        assert_eq!(reqs.minimum_items, 5);
    }

    #[test]
    fn top_n_is_clamped_into_range() {
        assert_eq!(derive("search news, top 1").minimum_items, 3);
        assert_eq!(derive("search news, top 99").minimum_items, 8);
        assert_eq!(derive("search news, top 6").minimum_items, 6);
    }

    #[test]
    fn single_keyword_family_is_not_enough() {
        // "find" alone hits tool-intent but not research-intent.
        let reqs = derive("find my keys");
        assert!(!reqs.enabled);
    }
}
