//! Evidence-record aggregation and per-sentence impact scoring.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub const LOW_VALUE_SIGNALS: &[&str] = &[
    "news video prices",
    "accept all cookies",
    "subscribe to continue reading",
    "sign in to continue",
    "enable javascript to continue",
    "your browser does not support",
    "all rights reserved",
    "this site uses cookies",
    "click here to continue",
    "we use cookies",
    "update your cookie preferences",
    "manage your privacy settings",
    "download the app",
    "advertisement",
    "sponsored content",
    "related articles",
    "trending now",
    "most popular",
    "share this article",
    "read more",
];

const BOT_CHALLENGE_PHRASES: &[&str] = &[
    "are you a robot",
    "not a robot",
    "detected unusual activity",
    "verify you are human",
    "just a moment",
    "attention required",
    "checking your browser",
    "access denied",
    "captcha",
    "security check",
    "click the box below",
];

static DATE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/20\d{2}/(0[1-9]|1[0-2])(/(0[1-9]|[12]\d|3[01]))?").expect("static regex is valid")
});
static TICKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[A-Z]{2,6}").expect("static regex is valid"));

const MOVEMENT_WORDS: &[&str] = &[
    "rose", "fell", "jumped", "dropped", "increased", "decreased", "launched", "announced",
    "approved", "expanded", "raised", "slashed", "repriced", "rotated", "boosted",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStatus {
    Ok,
    Blocked,
    LowQuality,
    NonArticle,
}

#[derive(Debug, Clone)]
pub struct EvidenceRecord {
    pub url: String,
    pub title: String,
    pub impact: String,
    pub evidence_text: Vec<String>,
    pub seq_hint: usize,
    pub status: EvidenceStatus,
    pub reason_code: Option<String>,
    pub reason_detail: Option<String>,
    pub word_count: usize,
}

impl EvidenceRecord {
    fn new(url: impl Into<String>, seq_hint: usize) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            impact: String::new(),
            evidence_text: Vec::new(),
            seq_hint,
            status: EvidenceStatus::Ok,
            reason_code: None,
            reason_detail: None,
            word_count: 0,
        }
    }

    pub fn blocked(&self) -> bool {
        matches!(self.reason_code.as_deref(), Some("blocked_by_bot_protection") | Some("consent_wall") | Some("login_wall"))
    }

    pub fn extractable(&self) -> bool {
        !self.blocked() && self.reason_code.as_deref() != Some("no_extractable_content")
    }
}

/// Collects evidence records from the successful `(tool_name, output)` pairs
/// accumulated by one reply, in call order.
pub fn collect(successful_tool_calls: &[(String, Value)]) -> Vec<EvidenceRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut records: HashMap<String, EvidenceRecord> = HashMap::new();

    for (tool_name, output) in successful_tool_calls {
        match tool_name.as_str() {
            "browser.navigate" => {
                if let Some(url) = output.get("url").and_then(Value::as_str) {
                    if !records.contains_key(url) {
                        let seq = order.len();
                        order.push(url.to_owned());
                        records.insert(url.to_owned(), EvidenceRecord::new(url, seq));
                    }
                }
            }
            "browser.extract" => {
                let url = output
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let Some(url) = url else { continue };
                let record = records.entry(url.clone()).or_insert_with(|| {
                    let seq = order.len();
                    order.push(url.clone());
                    EvidenceRecord::new(&url, seq)
                });
                apply_extract_output(record, output);
            }
            _ => {}
        }
    }

    let mut result: Vec<EvidenceRecord> = order
        .into_iter()
        .filter_map(|url| records.remove(&url))
        .collect();
    result.sort_by_key(|r| r.seq_hint);
    result
}

fn apply_extract_output(record: &mut EvidenceRecord, output: &Value) {
    if let Some(title) = output.get("title").and_then(Value::as_str) {
        if record.title.is_empty() {
            record.title = title.to_owned();
        }
    }
    let diagnostics = output.get("diagnostics").unwrap_or(output);
    if let Some(status) = diagnostics.get("status").and_then(Value::as_str) {
        record.status = match status {
            "blocked" => EvidenceStatus::Blocked,
            "low_quality" => EvidenceStatus::LowQuality,
            "non_article" => EvidenceStatus::NonArticle,
            _ => EvidenceStatus::Ok,
        };
    }
    if let Some(code) = diagnostics.get("reason_code").and_then(Value::as_str) {
        record.reason_code = Some(code.to_owned());
    }
    if let Some(detail) = diagnostics.get("reason_detail").and_then(Value::as_str) {
        record.reason_detail = Some(detail.to_owned());
    }
    if let Some(words) = diagnostics.get("word_count").and_then(Value::as_u64) {
        record.word_count = words as usize;
    }

    if record.reason_code.as_deref() == Some("no_extractable_content") {
        return;
    }
    if matches!(record.status, EvidenceStatus::Blocked) {
        return;
    }

    let mode = output.get("mode").and_then(Value::as_str).unwrap_or("text");
    let fields: &[&str] = match mode {
        "metadata" => &["description", "first_paragraph", "content_preview"],
        _ => &["excerpt", "content", "body", "article_body", "content_preview"],
    };
    for field in fields {
        if let Some(text) = output.get(*field).and_then(Value::as_str) {
            if text.split_whitespace().count() >= 8 {
                let clipped: String = text.chars().take(5_000).collect();
                if !record.evidence_text.contains(&clipped) {
                    record.evidence_text.push(clipped);
                }
            }
        }
    }
}

/// Synthesizes a record's `impact` line from its collected evidence text.
pub fn synthesize_impact(record: &mut EvidenceRecord) {
    if record.evidence_text.is_empty() {
        return;
    }
    let full_text = record.evidence_text.join(" ");
    let sentences = split_sentences(&full_text);
    let mut scored: Vec<(i32, &str)> = sentences
        .iter()
        .map(|s| (score_sentence(s, &record.url, &record.title), s.as_str()))
        .filter(|(score, _)| *score > i32::MIN)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut picked: Vec<&str> = Vec::new();
    for (_, sentence) in scored {
        if picked.len() == 2 {
            break;
        }
        if picked.iter().any(|p| word_overlap_ratio(p, sentence) >= 0.75) {
            continue;
        }
        picked.push(sentence);
    }

    let joined = picked.join(" ");
    record.impact = joined.chars().take(220).collect();
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| {
            let words = s.split_whitespace().count();
            (8..=48).contains(&words)
        })
        .collect()
}

fn score_sentence(sentence: &str, url: &str, title: &str) -> i32 {
    let lowered = sentence.to_lowercase();
    if BOT_CHALLENGE_PHRASES.iter().any(|p| lowered.contains(p)) {
        return i32::MIN;
    }
    if TICKER_RE.find_iter(sentence).count() >= 4 {
        return i32::MIN;
    }
    if lowered.contains("copyright") || lowered.contains("all rights reserved") {
        return i32::MIN;
    }
    if LOW_VALUE_SIGNALS.iter().any(|p| lowered.contains(p)) {
        return i32::MIN;
    }

    let mut score = sentence.split_whitespace().count() as i32;
    if DATE_PATH_RE.is_match(url) || lowered.contains("feb") || lowered.contains("2026") {
        score += 2;
    }
    if sentence.contains('%') || sentence.contains('$') {
        score += 1;
    }
    if MOVEMENT_WORDS.iter().any(|w| lowered.contains(w)) {
        score += 1;
    }
    let title_words: Vec<&str> = title.split_whitespace().filter(|w| w.len() >= 4).collect();
    let hits = title_words
        .iter()
        .filter(|w| lowered.contains(&w.to_lowercase()))
        .count();
    if hits >= 2 {
        score += 1;
    }
    score
}

fn word_overlap_ratio(a: &str, b: &str) -> f32 {
    use std::collections::HashSet;
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let smaller = set_a.len().min(set_b.len());
    intersection as f32 / smaller as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_navigate_then_extract_into_one_record() {
        let calls = vec![
            ("browser.navigate".to_owned(), json!({"url": "https://example.com/a"})),
            (
                "browser.extract".to_owned(),
                json!({
                    "url": "https://example.com/a",
                    "mode": "text",
                    "title": "Example Article",
                    "excerpt": "This is a long enough excerpt with more than eight words in it.",
                    "diagnostics": {"status": "ok", "word_count": 120},
                }),
            ),
        ];
        let records = collect(&calls);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Example Article");
        assert_eq!(records[0].word_count, 120);
        assert_eq!(records[0].evidence_text.len(), 1);
    }

    #[test]
    fn no_extractable_content_skips_evidence_text() {
        let calls = vec![(
            "browser.extract".to_owned(),
            json!({
                "url": "https://example.com/b",
                "excerpt": "This text would otherwise be picked up as evidence material.",
                "diagnostics": {"reason_code": "no_extractable_content"},
            }),
        )];
        let records = collect(&calls);
        assert_eq!(records.len(), 1);
        assert!(records[0].evidence_text.is_empty());
        assert!(!records[0].extractable());
    }

    #[test]
    fn synthesize_impact_skips_bot_challenge_sentences() {
        let mut record = EvidenceRecord::new("https://example.com/2026/02/article", 0);
        record.evidence_text.push(
            "Please verify you are human before continuing to read this fascinating long article today."
                .to_owned(),
        );
        record.evidence_text.push(
            "Bitcoin rose sharply today as tokenization of real world assets expanded across exchanges rapidly."
                .to_owned(),
        );
        synthesize_impact(&mut record);
        assert!(record.impact.contains("rose") || record.impact.contains("tokenization"));
        assert!(!record.impact.to_lowercase().contains("verify you are human"));
    }

    #[test]
    fn blocked_status_prevents_evidence_collection() {
        let calls = vec![(
            "browser.extract".to_owned(),
            json!({
                "url": "https://example.com/c",
                "excerpt": "This text should never be collected because the page is blocked entirely.",
                "diagnostics": {"status": "blocked", "reason_code": "blocked_by_bot_protection"},
            }),
        )];
        let records = collect(&calls);
        assert!(records[0].blocked());
        assert!(records[0].evidence_text.is_empty());
    }
}
