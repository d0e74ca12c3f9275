//! Deterministic "Top-N" Markdown summary fallback, model-output quality
//! gating, and idempotent response sanitization.

use std::sync::LazyLock;

use regex::Regex;

use super::evidence::EvidenceRecord;
use super::requirements::WebResearchRequirements;

static DATE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(20\d{2})/(0[1-9]|1[0-2])(?:/(0[1-9]|[12]\d|3[01]))?").expect("valid"));
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").expect("valid"));

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

fn host_of(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(url).to_owned()
}

fn date_label(record: &EvidenceRecord) -> Option<String> {
    if let Some(caps) = DATE_PATH_RE.captures(&record.url) {
        let year: usize = caps[1].parse().ok()?;
        let month: usize = caps[2].parse().ok()?;
        let month_name = MONTH_NAMES.get(month.checked_sub(1)?)?;
        return Some(match caps.get(3) {
            Some(day) => format!("{} {}, {}", month_name, day.as_str().trim_start_matches('0'), year),
            None => format!("{month_name} {year}"),
        });
    }
    let haystack = format!("{} {}", record.title, record.impact);
    YEAR_RE.find(&haystack).map(|m| m.as_str().to_owned())
}

/// Renders a deterministic Markdown "Top-N" summary from evidence records,
/// used when the model fails to produce a good final response itself.
pub fn render_deterministic_summary(
    records: &[EvidenceRecord],
    requirements: WebResearchRequirements,
    requested_top_n: Option<usize>,
) -> String {
    let limit = requested_top_n
        .unwrap_or(requirements.minimum_items)
        .min(requirements.minimum_items.max(requested_top_n.unwrap_or(0)))
        .min(12)
        .max(1);

    let mut out = String::from("Key themes from the gathered sources:\n\n");
    for (i, record) in records.iter().filter(|r| r.extractable()).take(limit).enumerate() {
        let headline = if record.title.is_empty() {
            host_of(&record.url)
        } else {
            record.title.clone()
        };
        let host = host_of(&record.url);
        let date = date_label(record).map(|d| format!("{d} — ")).unwrap_or_default();
        let impact: String = record.impact.chars().take(260).collect();
        out.push_str(&format!(
            "{}. {}{} [{}]({})\n   {}\n",
            i + 1,
            date,
            headline,
            host,
            record.url,
            impact
        ));
    }
    out
}

const LOW_QUALITY_MARKERS: &[&str] = &[
    "impact note unavailable",
    "did not expose a clear summary sentence",
    "compiled source diagnostics",
    "low-quality extracts:",
    "blocked sources:",
    "coverage limitation: extracted",
    "extractable source(s)",
    "[object object]",
];

const LOW_SIGNAL_URL_FRAGMENTS: &[&str] = &[
    "duckduckgo.com/help",
    "apps.apple.com",
    "play.google.com/store/apps",
    "/privacy",
    "/terms",
    "/cookie",
];

/// `responseHasLowResearchQuality`.
pub fn response_has_low_research_quality(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if LOW_QUALITY_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }
    if LOW_SIGNAL_URL_FRAGMENTS.iter().any(|m| lowered.contains(m)) {
        return true;
    }
    !lowered.contains("http://") && !lowered.contains("https://")
}

const SANITIZE_LINE_MARKERS: &[&str] = &[
    "extractable source(s)",
    "usable sources:",
    "coverage limitation:",
    "stopped before finalizing",
    "i can continue gathering alternatives",
    "model kept returning intent text instead of executable tool json",
];

const SANITIZE_TRUNCATE_MARKERS: &[&str] = &["low-quality extracts:", "blocked sources:", "per-source diagnostics:"];

/// `sanitizeResearchUserResponse` — an idempotent projection that strips
/// internal diagnostic lines and truncates at the first diagnostic block.
pub fn sanitize_research_user_response(text: &str) -> String {
    let mut truncated = text;
    for marker in SANITIZE_TRUNCATE_MARKERS {
        if let Some(pos) = truncated.to_lowercase().find(marker) {
            truncated = &truncated[..pos];
        }
    }

    let cleaned: Vec<&str> = truncated
        .lines()
        .filter(|line| {
            let lowered = line.to_lowercase();
            !SANITIZE_LINE_MARKERS.iter().any(|m| lowered.contains(m))
        })
        .collect();

    cleaned.join("\n").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::evidence::EvidenceStatus;

    fn record(url: &str, title: &str, impact: &str) -> EvidenceRecord {
        EvidenceRecord {
            url: url.to_owned(),
            title: title.to_owned(),
            impact: impact.to_owned(),
            evidence_text: vec![],
            seq_hint: 0,
            status: EvidenceStatus::Ok,
            reason_code: None,
            reason_detail: None,
            word_count: 100,
        }
    }

    #[test]
    fn renders_numbered_list_with_date_and_host() {
        let records = vec![record(
            "https://example.com/2026/02/14/rwa-news",
            "RWA Boom",
            "Tokenization rose sharply this week.",
        )];
        let reqs = WebResearchRequirements {
            enabled: true,
            minimum_items: 3,
        };
        let out = render_deterministic_summary(&records, reqs, None);
        assert!(out.contains("1."));
        assert!(out.contains("example.com"));
        assert!(out.contains("February 14, 2026"));
    }

    #[test]
    fn low_quality_detects_diagnostic_markers() {
        assert!(response_has_low_research_quality("Coverage limitation: extracted 2 of 5 sources"));
        assert!(!response_has_low_research_quality(
            "Here is a summary with a link https://example.com/article"
        ));
    }

    #[test]
    fn low_quality_detects_zero_external_links() {
        assert!(response_has_low_research_quality("Just some plain text with no links at all."));
    }

    #[test]
    fn sanitize_is_idempotent_and_strips_markers() {
        let text = "Here is the summary.\nCoverage limitation: extracted 2 of 5\nLow-quality extracts: foo bar";
        let once = sanitize_research_user_response(text);
        let twice = sanitize_research_user_response(&once);
        assert_eq!(once, twice);
        assert!(!once.to_lowercase().contains("coverage limitation"));
        assert!(!once.to_lowercase().contains("low-quality extracts"));
    }
}
