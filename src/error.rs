//! Error taxonomy for the reply loop and its activities.
//!
//! `CompletionReason` is the typed form of the `completion_reason` string
//! carried in every terminal `RunEvent` payload; `CoreError` wraps the same
//! taxonomy for in-process error propagation plus a couple of transport-level
//! variants that never reach an event payload directly.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionReason {
    Success,
    ResearchEvidenceComplete,
    PartialToolErrors,
    InsufficientWebResearchEvidence,
    InvalidToolPayload,
    MissingToolCalls,
    MaxIterations,
    LlmNoContent,
    LlmTransientError,
    LlmNoContentAfterTools,
    LlmTransientAfterTools,
    ActivityError,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ResearchEvidenceComplete => "research_evidence_complete",
            Self::PartialToolErrors => "partial_tool_errors",
            Self::InsufficientWebResearchEvidence => "insufficient_web_research_evidence",
            Self::InvalidToolPayload => "invalid_tool_payload",
            Self::MissingToolCalls => "missing_tool_calls",
            Self::MaxIterations => "max_iterations",
            Self::LlmNoContent => "llm_no_content",
            Self::LlmTransientError => "llm_transient_error",
            Self::LlmNoContentAfterTools => "llm_no_content_after_tools",
            Self::LlmTransientAfterTools => "llm_transient_after_tools",
            Self::ActivityError => "activity_error",
        }
    }

    /// A reply that ended on one of these reasons is a "good" terminal path
    /// (`run.completed`), everything else becomes `run.partial` / `run.failed`.
    pub fn is_clean_success(&self) -> bool {
        matches!(self, Self::Success | Self::ResearchEvidenceComplete)
    }
}

impl std::str::FromStr for CompletionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "success" => Self::Success,
            "research_evidence_complete" => Self::ResearchEvidenceComplete,
            "partial_tool_errors" => Self::PartialToolErrors,
            "insufficient_web_research_evidence" => Self::InsufficientWebResearchEvidence,
            "invalid_tool_payload" => Self::InvalidToolPayload,
            "missing_tool_calls" => Self::MissingToolCalls,
            "max_iterations" => Self::MaxIterations,
            "llm_no_content" => Self::LlmNoContent,
            "llm_transient_error" => Self::LlmTransientError,
            "llm_no_content_after_tools" => Self::LlmNoContentAfterTools,
            "llm_transient_after_tools" => Self::LlmTransientAfterTools,
            "activity_error" => Self::ActivityError,
            other => return Err(format!("unknown completion reason: {other}")),
        })
    }
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("llm returned no content")]
    LlmNoContent,

    #[error("llm request failed: {0}")]
    LlmTransient(String),

    #[error("invalid tool payload: {0}")]
    InvalidToolPayload(String),

    #[error("tool {0:?} is not in the allowlist")]
    ToolNotAllowed(String),

    #[error("tool dispatch failed: {0}")]
    ToolDispatch(String),

    #[error("insufficient web research evidence")]
    InsufficientEvidence,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("activity error: {0}")]
    Activity(String),
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_taxonomy_string() {
        let all = [
            CompletionReason::Success,
            CompletionReason::ResearchEvidenceComplete,
            CompletionReason::PartialToolErrors,
            CompletionReason::InsufficientWebResearchEvidence,
            CompletionReason::InvalidToolPayload,
            CompletionReason::MissingToolCalls,
            CompletionReason::MaxIterations,
            CompletionReason::LlmNoContent,
            CompletionReason::LlmTransientError,
            CompletionReason::LlmNoContentAfterTools,
            CompletionReason::LlmTransientAfterTools,
            CompletionReason::ActivityError,
        ];
        for reason in all {
            let parsed: CompletionReason = reason.as_str().parse().expect("reparse");
            assert_eq!(parsed, reason);
        }
    }

    #[test]
    fn unknown_reason_is_an_error() {
        assert!("bogus".parse::<CompletionReason>().is_err());
    }
}
