//! Per-request evidence scoring and the sufficiency predicate.

use std::sync::LazyLock;

use regex::Regex;

use super::evidence::{EvidenceRecord, LOW_VALUE_SIGNALS};
use super::requirements::WebResearchRequirements;

const RELEVANCE_SIGNALS: &[&str] = &[
    "rwa",
    "real world asset",
    "defi",
    "crypto",
    "tokenization",
    "stablecoin",
    "bitcoin",
    "ethereum",
];

const LOW_INTENT_SIGNALS: &[&str] = &[
    "press release",
    "event overview",
    "podcast",
    "newsletter",
    "conference",
    "sponsored",
    "top-100",
    "award",
    "price",
];

const NON_ARTICLE_PATH_MARKERS: &[&str] = &[
    "/search", "/results", "/tag/", "/tags/", "/topic/", "/topics/", "/author/", "/authors/",
    "/help", "/press-release", "/price/", "/prices/", "/people/", "/category/", "/section/",
    "/privacy", "/terms", "/legal", "/about", "/contact", "/opinion/", "/sponsored/",
];

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b20\d{2}\b").expect("valid"));

/// Expands an aggregate keyword (e.g. `rwa`) into itself plus its known
/// aliases, so requests phrased either way still match evidence text.
pub fn expand_aliases(keyword: &str) -> Vec<String> {
    let lowered = keyword.to_lowercase();
    let mut out = vec![lowered.clone()];
    match lowered.as_str() {
        "rwa" => out.extend(
            [
                "real world asset",
                "real-world asset",
                "tokenization",
                "tokenized",
                "on-chain treasury",
                "treasury token",
            ]
            .map(String::from),
        ),
        "defi" => out.push("decentralized finance".to_owned()),
        _ => {}
    }
    out
}

/// True when `url` looks like a non-article index/utility page rather than
/// a single news item.
pub fn is_non_article_url(url: &str) -> bool {
    let lowered = url.to_lowercase();
    NON_ARTICLE_PATH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

pub fn looks_like_landing_snippet(title: &str, impact: &str) -> bool {
    let haystack = format!("{} {}", title.to_lowercase(), impact.to_lowercase());
    haystack.contains("latest news") && haystack.contains("homepage")
        || haystack.trim().is_empty()
}

pub fn looks_like_not_found_snippet(title: &str, impact: &str) -> bool {
    let haystack = format!("{} {}", title.to_lowercase(), impact.to_lowercase());
    haystack.contains("page not found") || haystack.contains("404") || haystack.contains("does not exist")
}

pub fn looks_like_legal_policy_snippet(title: &str, impact: &str) -> bool {
    let haystack = format!("{} {}", title.to_lowercase(), impact.to_lowercase());
    haystack.contains("privacy policy") || haystack.contains("terms of service") || haystack.contains("cookie policy")
}

/// Applies the non-article / bot-blocked classification overrides described
/// for the research engine, mutating `reason_code`/`reason_detail` in place
/// when a heuristic fires that the tool runner's own diagnostics missed.
pub fn apply_classification_overrides(record: &mut EvidenceRecord) {
    if record.reason_code.is_some() {
        return;
    }
    if is_non_article_url(&record.url)
        || looks_like_landing_snippet(&record.title, &record.impact)
        || looks_like_not_found_snippet(&record.title, &record.impact)
        || looks_like_legal_policy_snippet(&record.title, &record.impact)
    {
        record.reason_code = Some("no_extractable_content".to_owned());
        record.reason_detail = Some("non_article_or_index_page".to_owned());
        return;
    }

    const BOT_PHRASES: &[&str] = &[
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
    let haystack = format!("{} {}", record.title.to_lowercase(), record.impact.to_lowercase());
    let url_lower = record.url.to_lowercase();
    if BOT_PHRASES.iter().any(|p| haystack.contains(p))
        || url_lower.contains("google.") && url_lower.contains("/sorry")
        || url_lower.contains("captcha")
        || url_lower.contains("challenge")
    {
        record.reason_code = Some("blocked_by_bot_protection".to_owned());
    }
}

/// `researchEvidenceQualityScoreForRequest`.
pub fn quality_score(
    record: &EvidenceRecord,
    specific_keywords: &[String],
    target_year: i32,
) -> i32 {
    let haystack = format!(
        "{} {} {}",
        record.url.to_lowercase(),
        record.title.to_lowercase(),
        record.impact.to_lowercase()
    );

    let mut score = (record.word_count as i32).min(120);
    if haystack.contains(&format!("/{target_year}/")) || haystack.contains("feb") || haystack.contains("march") {
        score += 18;
    }
    if let Some(found_year) = YEAR_RE
        .find(&haystack)
        .and_then(|m| m.as_str().parse::<i32>().ok())
    {
        if found_year != target_year {
            score -= 28;
        }
    }
    score += RELEVANCE_SIGNALS.iter().filter(|s| haystack.contains(*s)).count() as i32 * 6;
    score -= LOW_INTENT_SIGNALS.iter().filter(|s| haystack.contains(*s)).count() as i32 * 12;
    if LOW_VALUE_SIGNALS.iter().any(|s| haystack.contains(s)) {
        score -= 16;
    }

    if haystack.contains(&target_year.to_string()) {
        score += 10;
    } else if let Some(found_year) = YEAR_RE
        .find(&haystack)
        .and_then(|m| m.as_str().parse::<i32>().ok())
    {
        if found_year != target_year {
            score -= 20;
        }
    }

    let expanded_keywords: Vec<String> = specific_keywords.iter().flat_map(|k| expand_aliases(k)).collect();
    let matches = expanded_keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
    if !expanded_keywords.is_empty() {
        if matches > 0 {
            score += matches as i32 * 8;
        } else {
            score -= 30;
        }
    }

    score
}

fn is_usable(
    record: &EvidenceRecord,
    specific_keywords: &[String],
    target_year: Option<i32>,
    target_month: Option<&str>,
) -> bool {
    if !record.extractable() {
        return false;
    }
    if record.word_count < 40 {
        return false;
    }
    if record.impact.is_empty() || LOW_VALUE_SIGNALS.iter().any(|s| record.impact.to_lowercase().contains(s)) {
        return false;
    }
    let haystack = format!("{} {} {}", record.url, record.title, record.impact).to_lowercase();
    if !specific_keywords.is_empty() {
        let expanded: Vec<String> = specific_keywords.iter().flat_map(|k| expand_aliases(k)).collect();
        if !expanded.iter().any(|k| haystack.contains(k.as_str())) {
            return false;
        }
    }
    if let Some(year) = target_year {
        if !haystack.contains(&year.to_string()) {
            return false;
        }
    }
    if let Some(month) = target_month {
        if !haystack.contains(&month.to_lowercase()) {
            return false;
        }
    }
    let score = quality_score(record, specific_keywords, target_year.unwrap_or(2026));
    score >= 24
}

/// `hasSufficientWebResearchEvidenceForRequest`.
pub fn has_sufficient_evidence(
    records: &[EvidenceRecord],
    requirements: WebResearchRequirements,
    specific_keywords: &[String],
    target_year: Option<i32>,
    target_month: Option<&str>,
    successful_extract_calls: usize,
) -> bool {
    let usable: Vec<&EvidenceRecord> = records
        .iter()
        .filter(|r| is_usable(r, specific_keywords, target_year, target_month))
        .collect();

    let distinct_urls: std::collections::HashSet<&str> = usable.iter().map(|r| r.url.as_str()).collect();
    distinct_urls.len() >= requirements.minimum_items
        && successful_extract_calls >= (requirements.minimum_items / 2).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(url: &str, title: &str, impact: &str, word_count: usize) -> EvidenceRecord {
        EvidenceRecord {
            url: url.to_owned(),
            title: title.to_owned(),
            impact: impact.to_owned(),
            evidence_text: vec![],
            seq_hint: 0,
            status: super::super::evidence::EvidenceStatus::Ok,
            reason_code: None,
            reason_detail: None,
            word_count,
        }
    }

    #[test]
    fn expand_aliases_covers_rwa_family() {
        let aliases = expand_aliases("rwa");
        assert!(aliases.contains(&"tokenization".to_owned()));
        assert!(aliases.contains(&"real world asset".to_owned()));
    }

    #[test]
    fn non_article_url_detected() {
        assert!(is_non_article_url("https://example.com/tag/rwa"));
        assert!(!is_non_article_url("https://example.com/2026/02/rwa-news"));
    }

    #[test]
    fn classification_override_marks_bot_challenge() {
        let mut record = make_record(
            "https://example.com/a",
            "Are you a robot?",
            "Please verify you are human to continue.",
            50,
        );
        apply_classification_overrides(&mut record);
        assert_eq!(record.reason_code.as_deref(), Some("blocked_by_bot_protection"));
    }

    #[test]
    fn sufficiency_requires_minimum_distinct_usable_urls() {
        let mut records = Vec::new();
        for i in 0..5 {
            let mut r = make_record(
                &format!("https://example.com/2026/02/rwa-{i}"),
                "RWA Tokenization Update",
                "Tokenization of real world assets rose sharply across exchanges this week.",
                120,
            );
            r.seq_hint = i;
            records.push(r);
        }
        let reqs = WebResearchRequirements {
            enabled: true,
            minimum_items: 5,
        };
        let keywords = vec!["rwa".to_owned()];
        assert!(has_sufficient_evidence(&records, reqs, &keywords, Some(2026), None, 5));
    }

    #[test]
    fn sufficiency_fails_with_too_few_sources() {
        let records = vec![make_record(
            "https://example.com/2026/02/rwa-1",
            "RWA Update",
            "Tokenization of real world assets rose sharply this week across markets.",
            120,
        )];
        let reqs = WebResearchRequirements {
            enabled: true,
            minimum_items: 5,
        };
        let keywords = vec!["rwa".to_owned()];
        assert!(!has_sufficient_evidence(&records, reqs, &keywords, Some(2026), None, 1));
    }
}
