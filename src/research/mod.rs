//! Research-evidence engine: requirement derivation, evidence collection and
//! scoring, sufficiency testing, auto-deepen recovery, and the deterministic
//! summary fallback.

pub mod deepen;
pub mod evidence;
pub mod requirements;
pub mod scoring;
pub mod summary;

pub use deepen::{auto_deepen, DeepenOutcome, DeepenStatus};
pub use evidence::{EvidenceRecord, EvidenceStatus};
pub use requirements::{derive as derive_requirements, WebResearchRequirements};
pub use scoring::has_sufficient_evidence;
pub use summary::{render_deterministic_summary, response_has_low_research_quality, sanitize_research_user_response};

use serde_json::Value;

/// Runs evidence collection, classification overrides, and impact
/// synthesis over one reply's successful tool calls.
pub fn build_evidence(successful_tool_calls: &[(String, Value)]) -> Vec<EvidenceRecord> {
    let mut records = evidence::collect(successful_tool_calls);
    for record in &mut records {
        evidence::synthesize_impact(record);
        scoring::apply_classification_overrides(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_evidence_end_to_end() {
        let calls = vec![
            (
                "browser.navigate".to_owned(),
                json!({ "url": "https://example.com/2026/02/rwa-surge" }),
            ),
            (
                "browser.extract".to_owned(),
                json!({
                    "url": "https://example.com/2026/02/rwa-surge",
                    "mode": "text",
                    "title": "RWA Tokenization Surges",
                    "excerpt": "Tokenization of real world assets rose sharply across exchanges this week.",
                    "diagnostics": {"status": "ok", "word_count": 150},
                }),
            ),
        ];
        let records = build_evidence(&calls);
        assert_eq!(records.len(), 1);
        assert!(!records[0].impact.is_empty());
        assert!(records[0].extractable());
    }
}
