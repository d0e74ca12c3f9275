//! Extracts and canonicalizes tool calls from free-form model output.
//!
//! Three extraction strategies are tried in order: an inline fenced
//! ` ```tool `/` ```json ` block, a structural scan of every fenced block in
//! the response, and finally a bare top-level JSON object. Each strategy
//! recognizes a plain `{tool_name, input}` shape, a `{tool_calls: [...]}`
//! array, and the vendor `{function: {name, arguments}}` shape.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

pub const MAX_BODY_CHARS: usize = 120_000;
pub const MAX_CALLS: usize = 12;
pub const PENDING_BLOCK_TAIL_CHARS: usize = 140_000;

/// The closed set of tool names the dispatcher is permitted to send onward.
pub const ALLOWLIST: &[&str] = &[
    "browser.navigate",
    "browser.snapshot",
    "browser.click",
    "browser.type",
    "browser.scroll",
    "browser.extract",
    "browser.evaluate",
    "browser.pdf",
    "document.create_pptx",
    "document.create_docx",
    "document.create_pdf",
    "document.create_csv",
    "editor.list",
    "editor.read",
    "editor.write",
    "editor.delete",
    "editor.stat",
    "process.exec",
    "process.start",
    "process.status",
    "process.logs",
    "process.stop",
    "process.list",
];

pub fn is_allowlisted(tool_name: &str) -> bool {
    ALLOWLIST.contains(&tool_name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,
    pub input: Value,
}

/// The result of one parse attempt, including enough diagnostic state for
/// the reply loop to choose a recovery path.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub calls: Vec<ToolCall>,
    /// At least one fenced block tagged `tool` was present.
    pub saw_tool_block: bool,
    /// A fence was opened but never closed.
    pub had_incomplete: bool,
    /// A fenced block's body exceeded [`MAX_BODY_CHARS`].
    pub had_oversized: bool,
    /// The tail of the last unclosed fence, for pending-block recovery.
    pub pending_block: Option<String>,
}

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(tool|json)\s*\n?(.*?)```").expect("static regex is valid")
});

static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(tool|json)\b").expect("static regex is valid"));

pub fn parse_tool_calls(content: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut matched_any = false;

    for capture in FENCE_RE.captures_iter(content) {
        matched_any = true;
        let lang = &capture[1];
        let body = capture[2].trim();
        if lang == "tool" {
            outcome.saw_tool_block = true;
        }
        if body.len() > MAX_BODY_CHARS {
            outcome.had_oversized = true;
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            outcome.calls.extend(extract_calls(&value));
        }
    }

    if let Some(last_open) = OPEN_FENCE_RE.find_iter(content).last() {
        let after_open = &content[last_open.end()..];
        if !after_open.contains("```") {
            outcome.had_incomplete = true;
            let tail_start = content.len().saturating_sub(PENDING_BLOCK_TAIL_CHARS);
            outcome.pending_block = Some(content[tail_start.max(last_open.start())..].to_owned());
        }
    }

    if !matched_any && outcome.calls.is_empty() {
        let trimmed = content.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                outcome.calls.extend(extract_calls(&value));
            }
        }
    }

    outcome.calls.truncate(MAX_CALLS);
    outcome
}

fn extract_calls(value: &Value) -> Vec<ToolCall> {
    if let Some(array) = value.get("tool_calls").and_then(Value::as_array) {
        return array.iter().filter_map(call_from_entry).collect();
    }
    call_from_entry(value).into_iter().collect()
}

fn call_from_entry(entry: &Value) -> Option<ToolCall> {
    // Plain shape: {tool_name, input}
    if let Some(name) = entry.get("tool_name").and_then(Value::as_str) {
        let input = entry.get("input").cloned().unwrap_or(Value::Object(Map::new()));
        return Some(canonicalize(name, input));
    }
    // Vendor shape: {function: {name, arguments}} (arguments may be a JSON string)
    if let Some(func) = entry.get("function") {
        let name = func.get("name").and_then(Value::as_str)?;
        let arguments = match func.get("arguments") {
            Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::Object(Map::new())),
            Some(v) => v.clone(),
            None => Value::Object(Map::new()),
        };
        return Some(canonicalize(name, arguments));
    }
    // Bare shape: {name, arguments}
    if let Some(name) = entry.get("name").and_then(Value::as_str) {
        let input = entry.get("arguments").cloned().unwrap_or(Value::Object(Map::new()));
        return Some(canonicalize(name, input));
    }
    None
}

fn canonicalize(raw_name: &str, mut input: Value) -> ToolCall {
    let lowered = raw_name.to_lowercase();
    let tool_name = match lowered.as_str() {
        "browser.search" | "browser.browse" | "browser.open" | "browser.goto" | "browser.visit"
        | "browser.go" => {
            ensure_navigate_url(&mut input);
            "browser.navigate".to_owned()
        }
        "browser.screenshot" | "browser.take_screenshot" | "browser.capture" => {
            "browser.snapshot".to_owned()
        }
        "browser.extract_text" | "browser.read" | "browser.read_text" | "browser.get_text" => {
            set_mode(&mut input, "text");
            "browser.extract".to_owned()
        }
        "browser.extract_list" => {
            set_mode(&mut input, "list");
            "browser.extract".to_owned()
        }
        "browser.extract_table" => {
            set_mode(&mut input, "table");
            "browser.extract".to_owned()
        }
        "browser.extract_metadata" => {
            set_mode(&mut input, "metadata");
            "browser.extract".to_owned()
        }
        other => other.to_owned(),
    };
    ToolCall { tool_name, input }
}

fn set_mode(input: &mut Value, mode: &str) {
    if !input.is_object() {
        *input = Value::Object(Map::new());
    }
    if let Some(obj) = input.as_object_mut() {
        obj.entry("mode").or_insert_with(|| Value::String(mode.to_owned()));
    }
}

fn ensure_navigate_url(input: &mut Value) {
    if !input.is_object() {
        *input = Value::Object(Map::new());
    }
    let obj = input.as_object_mut().expect("just ensured object");
    if obj.get("url").and_then(Value::as_str).is_some() {
        return;
    }
    let query = ["query", "q", "search", "term", "keywords"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str));
    if let Some(query) = query {
        let url = format!(
            "https://duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        obj.insert("url".to_owned(), Value::String(url));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_tool_block() {
        let content = "Sure, let me check.\n```tool\n{\"tool_name\": \"editor.read\", \"input\": {\"path\": \"a.txt\"}}\n```\n";
        let outcome = parse_tool_calls(content);
        assert!(outcome.saw_tool_block);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "editor.read");
        assert_eq!(outcome.calls[0].input["path"], "a.txt");
    }

    #[test]
    fn parses_tool_calls_array_in_json_block() {
        let content = "```json\n{\"tool_calls\": [{\"tool_name\": \"editor.write\", \"input\": {\"path\": \"a.txt\", \"content\": \"hi\"}}]}\n```";
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "editor.write");
    }

    #[test]
    fn parses_vendor_function_arguments_shape() {
        let content = r#"```tool
{"tool_calls": [{"id": "call_1", "function": {"name": "editor.read", "arguments": "{\"path\": \"a.txt\"}"}}]}
```"#;
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "editor.read");
        assert_eq!(outcome.calls[0].input["path"], "a.txt");
    }

    #[test]
    fn parses_bare_top_level_json() {
        let content = r#"{"tool_name": "process.status", "input": {"pid": 1}}"#;
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].tool_name, "process.status");
    }

    #[test]
    fn detects_incomplete_fence() {
        let content = "```tool\n{\"tool_name\": \"editor.read\"";
        let outcome = parse_tool_calls(content);
        assert!(outcome.had_incomplete);
        assert!(outcome.calls.is_empty());
        assert!(outcome.pending_block.is_some());
    }

    #[test]
    fn detects_oversized_block() {
        let big = "x".repeat(MAX_BODY_CHARS + 10);
        let content = format!("```tool\n{{\"tool_name\": \"editor.read\", \"pad\": \"{big}\"}}\n```");
        let outcome = parse_tool_calls(&content);
        assert!(outcome.had_oversized);
        assert!(outcome.calls.is_empty());
    }

    #[test]
    fn plain_text_returns_empty() {
        let outcome = parse_tool_calls("The answer is 42. No tools needed.");
        assert!(outcome.calls.is_empty());
        assert!(!outcome.saw_tool_block);
        assert!(!outcome.had_incomplete);
    }

    #[test]
    fn canonicalizes_browser_search_alias_and_builds_url() {
        let content = r#"```tool
{"tool_name": "browser.search", "input": {"query": "rust async"}}
```"#;
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls[0].tool_name, "browser.navigate");
        assert!(outcome.calls[0].input["url"]
            .as_str()
            .unwrap()
            .contains("duckduckgo"));
    }

    #[test]
    fn canonicalizes_extract_text_alias_sets_mode() {
        let content = r#"```tool
{"tool_name": "browser.read_text", "input": {}}
```"#;
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls[0].tool_name, "browser.extract");
        assert_eq!(outcome.calls[0].input["mode"], "text");
    }

    #[test]
    fn caps_at_max_calls() {
        let mut calls = Vec::new();
        for i in 0..20 {
            calls.push(format!(r#"{{"tool_name": "editor.stat", "input": {{"n": {i}}}}}"#));
        }
        let content = format!("```tool\n{{\"tool_calls\": [{}]}}\n```", calls.join(","));
        let outcome = parse_tool_calls(&content);
        assert_eq!(outcome.calls.len(), MAX_CALLS);
    }

    #[test]
    fn is_idempotent_when_reserialized_as_single_tool_block() {
        let content = r#"```tool
{"tool_name": "editor.stat", "input": {"path": "a"}}
```"#;
        let first = parse_tool_calls(content);
        let reserialized = serde_json::json!({
            "tool_calls": first.calls.iter().map(|c| serde_json::json!({
                "tool_name": c.tool_name,
                "input": c.input,
            })).collect::<Vec<_>>()
        });
        let wrapped = format!("```tool\n{reserialized}\n```");
        let second = parse_tool_calls(&wrapped);
        assert_eq!(first.calls, second.calls);
    }

    #[test]
    fn allowlist_rejects_unknown_tool() {
        assert!(is_allowlisted("editor.read"));
        assert!(!is_allowlisted("shell.exec"));
    }
}
