//! Sends a single canonicalized tool call to the external Tool Runner.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;
use crate::tool_call::{is_allowlisted, ToolCall};

/// Abstraction over "send one tool call, get a result" so the research
/// auto-deepen logic can be driven by a mock in tests.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        run_id: &str,
        call: &ToolCall,
        browser_user_tab: Option<&BrowserUserTab>,
    ) -> Result<Value, ToolDispatchError>;
}

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(2);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(8);
const CONTRACT_VERSION: &str = "tool_contract_v2";

/// Per-run browser-in-user-tab preferences, injected into browser tool input.
#[derive(Debug, Clone, Default)]
pub struct BrowserUserTab {
    pub enabled: bool,
    pub interaction_allowed: bool,
    pub allowlist_domains: Vec<String>,
    pub preferred_browser: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    contract_version: &'static str,
    run_id: &'a str,
    invocation_id: String,
    idempotency_key: String,
    tool_name: &'a str,
    input: Value,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason_code: Option<String>,
    #[serde(default)]
    reason_detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolDispatchError {
    pub invocation_id: String,
    pub message: String,
    pub reason_code: Option<String>,
}

impl std::fmt::Display for ToolDispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason_code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolCapabilities {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub browser_enabled: bool,
    #[serde(default)]
    pub browser_healthy: bool,
}

pub struct ToolDispatcher {
    base_url: String,
    client: reqwest::Client,
}

impl ToolDispatcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolDispatcher {
    async fn execute(
        &self,
        run_id: &str,
        call: &ToolCall,
        browser_user_tab: Option<&BrowserUserTab>,
    ) -> Result<Value, ToolDispatchError> {
        if !is_allowlisted(&call.tool_name) {
            return Err(ToolDispatchError {
                invocation_id: Uuid::new_v4().to_string(),
                message: format!("tool {:?} not allowed", call.tool_name),
                reason_code: None,
            });
        }

        let invocation_id = Uuid::new_v4().to_string();
        let mut input = call.input.clone();
        if let Some(tab) = browser_user_tab {
            if tab.enabled && call.tool_name.starts_with("browser.") {
                inject_user_tab_guardrails(&mut input, tab);
            }
        }

        let request = ExecuteRequest {
            contract_version: CONTRACT_VERSION,
            run_id,
            invocation_id: invocation_id.clone(),
            idempotency_key: invocation_id.clone(),
            tool_name: &call.tool_name,
            input,
            timeout_ms: CALL_TIMEOUT.as_millis() as u64,
        };

        let url = format!("{}/tools/execute", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(CALL_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&invocation_id, &e))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: Option<ExecuteResponse> = serde_json::from_str(&body).ok();
            let message = parsed
                .as_ref()
                .map(|p| dispatch_message(p.error.clone(), p.reason_detail.as_deref()))
                .unwrap_or_else(|| body.clone());
            let reason_code = parsed.and_then(|p| p.reason_code).or_else(|| classify_reason_code(&message));
            return Err(ToolDispatchError {
                invocation_id,
                message,
                reason_code,
            });
        }

        let parsed: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| transport_error(&invocation_id, &e))?;

        if parsed.status != "ok" {
            let message = dispatch_message(parsed.error, parsed.reason_detail.as_deref());
            let reason_code = parsed.reason_code.or_else(|| classify_reason_code(&message));
            return Err(ToolDispatchError {
                invocation_id,
                message,
                reason_code,
            });
        }

        Ok(parsed.output)
    }
}

impl ToolDispatcher {
    pub async fn capabilities(&self) -> Result<ToolCapabilities, CoreError> {
        let url = format!("{}/tools/capabilities", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(CAPABILITY_TIMEOUT)
            .send()
            .await?;
        response.json().await.map_err(CoreError::from)
    }

    /// Best-effort cleanup; failures are logged by the caller, never fatal.
    pub async fn cleanup(&self, run_id: &str) -> Result<(), CoreError> {
        let url = format!(
            "{}/runs/{}/processes/cleanup",
            self.base_url.trim_end_matches('/'),
            run_id
        );
        self.client
            .post(&url)
            .timeout(CLEANUP_TIMEOUT)
            .json(&serde_json::json!({ "force": true }))
            .send()
            .await?;
        Ok(())
    }
}

fn dispatch_message(error: Option<String>, reason_detail: Option<&str>) -> String {
    let base = error.unwrap_or_else(|| "tool execution failed".to_owned());
    match reason_detail {
        Some(detail) if !detail.is_empty() => format!("{base}: {detail}"),
        _ => base,
    }
}

fn transport_error(invocation_id: &str, e: &reqwest::Error) -> ToolDispatchError {
    let message = e.to_string();
    let reason_code = if e.is_timeout() {
        Some("timeout".to_owned())
    } else {
        classify_reason_code(&message)
    };
    ToolDispatchError {
        invocation_id: invocation_id.to_owned(),
        message,
        reason_code,
    }
}

/// Well-known substrings the tool runner's own error text falls back to when
/// it doesn't supply a structured `reason_code`/`reason_detail`.
const REASON_CODE_SUBSTRINGS: &[(&str, &[&str])] = &[
    (
        "blocked_by_bot_protection",
        &["bot protection", "are you a robot", "captcha", "access denied", "checking your browser"],
    ),
    ("consent_wall", &["consent wall", "accept cookies", "cookie consent"]),
    ("no_extractable_content", &["no extractable content", "nothing to extract", "empty page"]),
    ("user_tab_mode_unavailable", &["user tab mode unavailable", "user tab unavailable", "no active browser tab"]),
    ("timeout", &["timed out", "timeout"]),
];

fn classify_reason_code(message: &str) -> Option<String> {
    let lowered = message.to_lowercase();
    REASON_CODE_SUBSTRINGS
        .iter()
        .find(|(_, substrings)| substrings.iter().any(|s| lowered.contains(s)))
        .map(|(code, _)| (*code).to_owned())
}

fn inject_user_tab_guardrails(input: &mut Value, tab: &BrowserUserTab) {
    if !input.is_object() {
        *input = Value::Object(Default::default());
    }
    let obj = input.as_object_mut().expect("just ensured object");
    obj.insert("_browser_mode".to_owned(), Value::String("user_tab".to_owned()));
    obj.insert(
        "_browser_guardrails".to_owned(),
        serde_json::json!({
            "interaction_allowed": tab.interaction_allowed,
            "create_tab_group": true,
            "allowlist_domains": tab.allowlist_domains,
            "preferred_browser": tab.preferred_browser,
            "browser_user_agent": tab.user_agent,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_dispatcher_has_empty_base_url() {
        let dispatcher = ToolDispatcher::new("");
        assert!(!dispatcher.is_configured());
    }

    #[tokio::test]
    async fn rejects_non_allowlisted_tool_without_network() {
        let dispatcher = ToolDispatcher::new("http://127.0.0.1:1");
        let call = ToolCall {
            tool_name: "shell.exec".to_owned(),
            input: serde_json::json!({}),
        };
        let err = dispatcher.execute("run-1", &call, None).await.unwrap_err();
        assert!(err.message.contains("not allowed"));
    }

    #[test]
    fn classifies_reason_code_from_well_known_substrings() {
        assert_eq!(
            classify_reason_code("request failed: access denied by bot protection"),
            Some("blocked_by_bot_protection".to_owned())
        );
        assert_eq!(classify_reason_code("please accept cookies to continue"), Some("consent_wall".to_owned()));
        assert_eq!(classify_reason_code("no extractable content on this page"), Some("no_extractable_content".to_owned()));
        assert_eq!(classify_reason_code("something unrelated went wrong"), None);
    }

    #[test]
    fn injects_user_tab_guardrails_only_for_browser_tools() {
        let mut input = serde_json::json!({});
        let tab = BrowserUserTab {
            enabled: true,
            interaction_allowed: true,
            allowlist_domains: vec!["example.com".to_owned()],
            preferred_browser: Some("chrome".to_owned()),
            user_agent: None,
        };
        inject_user_tab_guardrails(&mut input, &tab);
        assert_eq!(input["_browser_mode"], "user_tab");
        assert_eq!(input["_browser_guardrails"]["interaction_allowed"], true);
    }
}
