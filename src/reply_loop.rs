//! The bounded iteration that drives model generations, tool-call parsing,
//! tool dispatch, and (when required) research recovery for one user turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::conversation_window::clamp;
use crate::error::{CompletionReason, CoreError};
use crate::event::{EventBus, RunEvent};
use crate::message::{Message, MessageRole};
use crate::prompt::{MemoryPromptBuilder, NoopMemoryPromptBuilder, NoopSystemPromptBuilder, SystemPromptBuilder};
use crate::provider::{ApiMessage, ApiRole, CompletionRequest, LLMProvider};
use crate::research;
use crate::store::Store;
use crate::tool_call::parse_tool_calls;
use crate::tool_dispatcher::{BrowserUserTab, ToolExecutor};

#[derive(Debug, Clone)]
pub struct ReplyLoopConfig {
    pub max_tool_iterations: usize,
    pub max_tool_iterations_research: usize,
    pub max_llm_generate_attempts: usize,
    pub max_tool_intent_reprompts: usize,
    pub max_tool_recovery_reprompts: usize,
    pub max_no_content_reprompts: usize,
    pub max_web_research_reprompts: usize,
    pub llm_phase_budget: Duration,
    pub backoff_steps: [Duration; 2],
    pub max_messages: usize,
    pub max_chars: usize,
}

impl Default for ReplyLoopConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 4,
            max_tool_iterations_research: 18,
            max_llm_generate_attempts: 2,
            max_tool_intent_reprompts: 2,
            max_tool_recovery_reprompts: 1,
            max_no_content_reprompts: 1,
            max_web_research_reprompts: 2,
            llm_phase_budget: Duration::from_secs(20),
            backoff_steps: [Duration::from_millis(250), Duration::from_millis(750)],
            max_messages: 80,
            max_chars: 120_000,
        }
    }
}

/// The outcome of a single `generate_reply` call.
pub struct ReplyOutcome {
    pub content: String,
    pub completion_reason: CompletionReason,
    pub events: Vec<RunEvent>,
}

pub struct ReplyLoop {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    default_candidates: Vec<String>,
    dispatcher: Arc<dyn ToolExecutor>,
    tool_runner_configured: bool,
    bus: Option<Arc<dyn EventBus>>,
    config: ReplyLoopConfig,
    system_prompt_builder: Arc<dyn SystemPromptBuilder>,
    memory_prompt_builder: Arc<dyn MemoryPromptBuilder>,
}

impl ReplyLoop {
    pub fn new(
        providers: HashMap<String, Arc<dyn LLMProvider>>,
        default_candidates: Vec<String>,
        dispatcher: Arc<dyn ToolExecutor>,
        tool_runner_configured: bool,
    ) -> Self {
        Self::with_prompt_builders(
            providers,
            default_candidates,
            dispatcher,
            tool_runner_configured,
            Arc::new(NoopSystemPromptBuilder),
            Arc::new(NoopMemoryPromptBuilder),
        )
    }

    pub fn with_prompt_builders(
        providers: HashMap<String, Arc<dyn LLMProvider>>,
        default_candidates: Vec<String>,
        dispatcher: Arc<dyn ToolExecutor>,
        tool_runner_configured: bool,
        system_prompt_builder: Arc<dyn SystemPromptBuilder>,
        memory_prompt_builder: Arc<dyn MemoryPromptBuilder>,
    ) -> Self {
        Self {
            providers,
            default_candidates,
            dispatcher,
            tool_runner_configured,
            bus: None,
            config: ReplyLoopConfig::default(),
            system_prompt_builder,
            memory_prompt_builder,
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn bus(&self) -> Option<&Arc<dyn EventBus>> {
        self.bus.as_ref()
    }

    pub fn with_config(mut self, config: ReplyLoopConfig) -> Self {
        self.config = config;
        self
    }

    fn candidates_for(&self, messages: &[Message]) -> Vec<String> {
        let route = messages
            .iter()
            .rev()
            .find_map(|m| m.metadata_str("model_route"));
        if let Some(route) = route {
            let parsed: Vec<String> = route
                .split([',', ';', '\n'])
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                return parsed;
            }
        }
        self.default_candidates.clone()
    }

    /// Runs the full reply loop for one user turn and returns the final
    /// assistant content plus the events that should be persisted, in order.
    pub async fn run(&self, run_id: &str, store: &dyn Store, user_message: &str) -> Result<ReplyOutcome, CoreError> {
        let mut messages = store.list_messages(run_id)?;
        let mut events = Vec::new();
        let mut seq = store.next_seq(run_id)?;

        let requirements = research::derive_requirements(user_message);
        let keywords = extract_keywords(user_message);
        let target_year = 2026;

        let mut successful_tool_calls: Vec<(String, Value)> = Vec::new();
        let mut had_tool_errors = false;
        let mut pending_tool_block: Option<String> = None;
        let mut tool_intent_reprompts = 0usize;
        let mut tool_recovery_reprompts = 0usize;
        let mut auto_deepen_attempted = false;

        let max_iterations = if requirements.enabled {
            self.config.max_tool_iterations_research
        } else {
            self.config.max_tool_iterations
        };

        for _iteration in 0..max_iterations {
            let clamped = clamp(&messages, self.config.max_messages, self.config.max_chars);
            let candidates = self.candidates_for(&clamped);

            let generation = self.generate_with_retry(&candidates, &clamped, &mut events, run_id, &mut seq).await;

            let response = match generation {
                Ok(content) => content,
                Err(err) => {
                    let transient = matches!(err, CoreError::LlmTransient(_));
                    let tools_already_succeeded = !successful_tool_calls.is_empty();
                    let reason = match (transient, tools_already_succeeded) {
                        (true, true) => CompletionReason::LlmTransientAfterTools,
                        (true, false) => CompletionReason::LlmTransientError,
                        (false, true) => CompletionReason::LlmNoContentAfterTools,
                        (false, false) => CompletionReason::LlmNoContent,
                    };
                    let content = if tools_already_succeeded {
                        self.best_effort_summary(&successful_tool_calls, requirements)
                    } else {
                        "The model returned an empty response.".to_owned()
                    };
                    return Ok(self.finish(run_id, &mut seq, &mut events, content, reason));
                }
            };

            let pending = pending_tool_block.take();
            let to_parse = match &pending {
                Some(pending) => format!("{pending}{response}"),
                None => response.clone(),
            };
            let mut outcome = parse_tool_calls(&to_parse);

            // A continuation glued onto the stale pending block can still look
            // broken even when the new response by itself is a clean, complete
            // reply (the model gave up on the tool call and just answered). In
            // that case prefer the standalone parse over the garbled one.
            if pending.is_some() && outcome.calls.is_empty() && (outcome.had_incomplete || outcome.had_oversized) {
                let standalone = parse_tool_calls(&response);
                if !standalone.saw_tool_block && !standalone.had_incomplete && !standalone.had_oversized {
                    outcome = standalone;
                }
            }

            if outcome.calls.is_empty() {
                if outcome.saw_tool_block || outcome.had_incomplete || outcome.had_oversized {
                    if tool_recovery_reprompts < self.config.max_tool_recovery_reprompts {
                        tool_recovery_reprompts += 1;
                        pending_tool_block = outcome.pending_block.take();
                        let hint = recovery_hint(&outcome);
                        messages.push(Message::assistant(response.clone(), 0));
                        messages.push(Message::system(hint, 0));
                        continue;
                    }
                    return Ok(self.finish(
                        run_id,
                        &mut seq,
                        &mut events,
                        "I couldn't produce valid tool instructions; here is my best plain-text answer instead."
                            .to_owned(),
                        CompletionReason::InvalidToolPayload,
                    ));
                }

                let tools_required = self.tool_runner_configured && requires_tools(user_message);
                if tools_required && successful_tool_calls.is_empty() {
                    if tool_intent_reprompts < self.config.max_tool_intent_reprompts {
                        tool_intent_reprompts += 1;
                        messages.push(Message::assistant(response.clone(), 0));
                        messages.push(Message::system(
                            "Respond with exactly one fenced ```tool JSON block to invoke a tool.".to_owned(),
                            0,
                        ));
                        continue;
                    }
                    if requirements.enabled && !auto_deepen_attempted {
                        auto_deepen_attempted = true;
                        self.run_auto_deepen(run_id, &keywords, target_year, &mut successful_tool_calls, &mut events, &mut seq)
                            .await;
                        if self.sufficient(&successful_tool_calls, requirements, &keywords, target_year) {
                            let summary = self.finalize_research(&successful_tool_calls, requirements, &keywords, target_year);
                            return Ok(self.finish(run_id, &mut seq, &mut events, summary, CompletionReason::ResearchEvidenceComplete));
                        }
                    }
                    return Ok(self.finish(
                        run_id,
                        &mut seq,
                        &mut events,
                        "I was unable to determine which tool to call for this request.".to_owned(),
                        CompletionReason::MissingToolCalls,
                    ));
                }

                if requirements.enabled && !self.sufficient(&successful_tool_calls, requirements, &keywords, target_year) {
                    if !auto_deepen_attempted {
                        auto_deepen_attempted = true;
                        self.run_auto_deepen(run_id, &keywords, target_year, &mut successful_tool_calls, &mut events, &mut seq)
                            .await;
                        if self.sufficient(&successful_tool_calls, requirements, &keywords, target_year) {
                            let summary = self.finalize_research(&successful_tool_calls, requirements, &keywords, target_year);
                            return Ok(self.finish(run_id, &mut seq, &mut events, summary, CompletionReason::ResearchEvidenceComplete));
                        }
                    }
                    let summary = self.finalize_research(&successful_tool_calls, requirements, &keywords, target_year);
                    return Ok(self.finish(run_id, &mut seq, &mut events, summary, CompletionReason::InsufficientWebResearchEvidence));
                }

                let cleaned = research::sanitize_research_user_response(&strip_fences(&response));
                let reason = if had_tool_errors {
                    CompletionReason::PartialToolErrors
                } else if requirements.enabled {
                    CompletionReason::ResearchEvidenceComplete
                } else {
                    CompletionReason::Success
                };
                let content = if cleaned.is_empty() { strip_fences(&response) } else { cleaned };
                return Ok(self.finish(run_id, &mut seq, &mut events, content, reason));
            }

            // Dispatch tool calls.
            messages.push(Message::assistant(response.clone(), 0));
            for call in outcome.calls.iter().take(12) {
                match self.dispatcher.execute(run_id, call, None::<&BrowserUserTab>).await {
                    Ok(output) => {
                        successful_tool_calls.push((call.tool_name.clone(), output.clone()));
                        let envelope = serde_json::json!({ "tool_name": call.tool_name, "output": output });
                        let truncated = truncate_json(&envelope, 4_000);
                        messages.push(Message::system(format!("Tool result: {truncated}"), 0));
                    }
                    Err(err) => {
                        had_tool_errors = true;
                        seq += 1;
                        let mut event = RunEvent::new(run_id, seq, "tool.failed")
                            .with_payload("tool_name", Value::String(call.tool_name.clone()))
                            .with_payload("message", Value::String(err.message.clone()));
                        if let Some(reason_code) = &err.reason_code {
                            event = event.with_payload("reason_code", Value::String(reason_code.clone()));
                        }
                        self.emit(&mut events, event);
                        messages.push(Message::system(format!("Tool {} failed: {err}", call.tool_name), 0));
                    }
                }
            }

            if requirements.enabled && self.sufficient(&successful_tool_calls, requirements, &keywords, target_year) {
                let summary = self.finalize_research(&successful_tool_calls, requirements, &keywords, target_year);
                return Ok(self.finish(run_id, &mut seq, &mut events, summary, CompletionReason::ResearchEvidenceComplete));
            }
        }

        let reason = if requirements.enabled {
            if !auto_deepen_attempted {
                self.run_auto_deepen(run_id, &keywords, target_year, &mut successful_tool_calls, &mut events, &mut seq)
                    .await;
            }
            if self.sufficient(&successful_tool_calls, requirements, &keywords, target_year) {
                CompletionReason::ResearchEvidenceComplete
            } else {
                CompletionReason::InsufficientWebResearchEvidence
            }
        } else {
            CompletionReason::MaxIterations
        };
        let content = if requirements.enabled {
            self.finalize_research(&successful_tool_calls, requirements, &keywords, target_year)
        } else {
            "I reached the iteration limit before finishing this reply.".to_owned()
        };
        Ok(self.finish(run_id, &mut seq, &mut events, content, reason))
    }

    async fn generate_with_retry(
        &self,
        candidates: &[String],
        messages: &[Message],
        events: &mut Vec<RunEvent>,
        run_id: &str,
        seq: &mut u64,
    ) -> Result<String, CoreError> {
        let deadline = Instant::now() + self.config.llm_phase_budget;

        let mut api_messages: Vec<ApiMessage> = Vec::new();
        let system_prompt = self.system_prompt_builder.build();
        if !system_prompt.is_empty() {
            api_messages.push(ApiMessage { role: ApiRole::System, content: system_prompt });
        }
        let memory_prompt = self.memory_prompt_builder.build(messages);
        if !memory_prompt.is_empty() {
            api_messages.push(ApiMessage { role: ApiRole::System, content: memory_prompt });
        }
        api_messages.extend(messages.iter().map(|m| ApiMessage {
            role: match m.role {
                MessageRole::System => ApiRole::System,
                MessageRole::User => ApiRole::User,
                MessageRole::Assistant => ApiRole::Assistant,
            },
            content: m.content.clone(),
        }));

        let mut last_failure_was_transient = false;

        for candidate in candidates {
            let (provider_id, model) = split_candidate(candidate);
            let Some(provider) = self.providers.get(&provider_id) else {
                continue;
            };
            let request = CompletionRequest::new(model.unwrap_or_default(), api_messages.clone());

            for attempt in 0..self.config.max_llm_generate_attempts {
                if Instant::now() >= deadline {
                    return Err(CoreError::LlmTransient("phase budget exceeded".to_owned()));
                }
                if attempt > 0 {
                    tokio::time::sleep(self.config.backoff_steps[(attempt - 1).min(1)]).await;
                }
                *seq += 1;
                self.emit(
                    events,
                    RunEvent::new(run_id, *seq, "model.request.started")
                        .with_payload("provider", Value::String(provider_id.clone())),
                );
                match provider.complete(&request).await {
                    Ok(response) => {
                        *seq += 1;
                        self.emit(events, RunEvent::new(run_id, *seq, "model.request.completed"));
                        return Ok(response.content);
                    }
                    Err(e) => {
                        last_failure_was_transient = matches!(e, CoreError::LlmTransient(_));
                        *seq += 1;
                        self.emit(
                            events,
                            RunEvent::new(run_id, *seq, "model.request.failed")
                                .with_payload("provider", Value::String(provider_id.clone()))
                                .with_payload("message", Value::String(e.to_string())),
                        );
                    }
                }
            }
        }

        if last_failure_was_transient {
            Err(CoreError::LlmTransient("providers exhausted".to_owned()))
        } else {
            Err(CoreError::LlmNoContent)
        }
    }

    async fn run_auto_deepen(
        &self,
        run_id: &str,
        keywords: &[String],
        target_year: i32,
        successful_tool_calls: &mut Vec<(String, Value)>,
        events: &mut Vec<RunEvent>,
        seq: &mut u64,
    ) {
        let failed_urls: Vec<String> = research::build_evidence(successful_tool_calls)
            .into_iter()
            .filter(|r| !r.extractable())
            .map(|r| r.url)
            .collect();
        let seeds = research::deepen::build_seeds(&failed_urls, keywords, 12);

        *seq += 1;
        self.emit(
            events,
            RunEvent::new(run_id, *seq, "research.deepening")
                .with_payload("status", Value::String("started".to_owned()))
                .with_payload("seed_count", Value::from(seeds.len())),
        );

        let outcome = research::auto_deepen(self.dispatcher.as_ref(), run_id, &seeds, keywords, target_year, None).await;
        successful_tool_calls.extend(outcome.evidence.clone());

        *seq += 1;
        let status = match outcome.status {
            research::DeepenStatus::Completed => "completed",
            research::DeepenStatus::Partial => "partial",
            research::DeepenStatus::Noop => "noop",
        };
        self.emit(
            events,
            RunEvent::new(run_id, *seq, "research.deepening")
                .with_payload("status", Value::String(status.to_owned()))
                .with_payload("candidate_count", Value::from(outcome.candidate_count))
                .with_payload("tool_call_count", Value::from(outcome.tool_call_count)),
        );
    }

    /// Appends `event` to `events` and republishes it on the in-process bus,
    /// if one is configured. Every event appended anywhere in the loop goes
    /// through this so the bus mirrors the durable stream exactly.
    fn emit(&self, events: &mut Vec<RunEvent>, event: RunEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(&event);
        }
        events.push(event);
    }

    fn sufficient(
        &self,
        successful_tool_calls: &[(String, Value)],
        requirements: research::WebResearchRequirements,
        keywords: &[String],
        target_year: i32,
    ) -> bool {
        let records = research::build_evidence(successful_tool_calls);
        let extract_calls = successful_tool_calls.iter().filter(|(n, _)| n == "browser.extract").count();
        research::has_sufficient_evidence(&records, requirements, keywords, Some(target_year), None, extract_calls)
    }

    fn finalize_research(
        &self,
        successful_tool_calls: &[(String, Value)],
        requirements: research::WebResearchRequirements,
        _keywords: &[String],
        _target_year: i32,
    ) -> String {
        let records = research::build_evidence(successful_tool_calls);
        research::render_deterministic_summary(&records, requirements, Some(requirements.minimum_items))
    }

    fn best_effort_summary(&self, successful_tool_calls: &[(String, Value)], requirements: research::WebResearchRequirements) -> String {
        if successful_tool_calls.is_empty() {
            return "The model returned an empty response.".to_owned();
        }
        let records = research::build_evidence(successful_tool_calls);
        if records.is_empty() {
            "I gathered some tool results but the model could not produce a final summary.".to_owned()
        } else {
            research::render_deterministic_summary(&records, requirements, None)
        }
    }

    fn finish(
        &self,
        run_id: &str,
        seq: &mut u64,
        events: &mut Vec<RunEvent>,
        content: String,
        reason: CompletionReason,
    ) -> ReplyOutcome {
        *seq += 1;
        let event_type = if reason.is_clean_success() {
            "run.completed"
        } else if matches!(reason, CompletionReason::LlmNoContent | CompletionReason::LlmTransientError) {
            "run.failed"
        } else {
            "run.partial"
        };
        let event = RunEvent::new(run_id, *seq, event_type)
            .with_payload("completion_reason", Value::String(reason.as_str().to_owned()));
        self.emit(events, event);
        ReplyOutcome {
            content,
            completion_reason: reason,
            events: std::mem::take(events),
        }
    }
}

fn split_candidate(candidate: &str) -> (String, Option<String>) {
    match candidate.split_once(':') {
        Some((provider, model)) => (provider.trim().to_owned(), Some(model.trim().to_owned())),
        None => (candidate.trim().to_owned(), None),
    }
}

fn requires_tools(user_message: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "browse", "search", "research", "file", "read", "write", "run", "execute", "edit", "create",
    ];
    let lowered = user_message.to_lowercase();
    KEYWORDS.iter().any(|k| lowered.contains(k))
}

fn extract_keywords(user_message: &str) -> Vec<String> {
    const DOMAIN_TERMS: &[&str] = &["rwa", "defi", "crypto", "bitcoin", "ethereum", "tokenization", "stablecoin"];
    let lowered = user_message.to_lowercase();
    DOMAIN_TERMS.iter().filter(|t| lowered.contains(*t)).map(|t| t.to_string()).collect()
}

fn recovery_hint(outcome: &crate::tool_call::ParseOutcome) -> String {
    if outcome.had_oversized {
        "Your last tool block was too large; please retry with a smaller payload.".to_owned()
    } else if outcome.had_incomplete {
        "Your last tool block was not closed; please re-emit a single complete ```tool JSON block.".to_owned()
    } else {
        "Your last tool block was invalid JSON; please re-emit a single valid ```tool JSON block.".to_owned()
    }
}

fn strip_fences(text: &str) -> String {
    static FENCE: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"(?s)```(tool|json).*?```").expect("valid"));
    FENCE.replace_all(text, "").trim().to_owned()
}

fn truncate_json(value: &Value, max_chars: usize) -> String {
    let rendered = value.to_string();
    if rendered.len() <= max_chars {
        rendered
    } else {
        let clipped: String = rendered.chars().take(max_chars).collect();
        format!("{clipped}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::provider::CompletionResponse;
    use crate::store::InMemoryStore;
    use crate::tool_call::ToolCall;
    use crate::tool_dispatcher::ToolDispatchError;

    struct MockProvider {
        responses: Vec<&'static str>,
        index: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, CoreError> {
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(i) {
                Some(content) => Ok(CompletionResponse {
                    content: (*content).to_owned(),
                    model: "mock".to_owned(),
                    usage: Default::default(),
                    finish_reason: Some("stop".to_owned()),
                }),
                None => Err(CoreError::LlmNoContent),
            }
        }

        fn context_limit(&self) -> usize {
            128_000
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    struct FailThenOkProvider {
        fail_times: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for FailThenOkProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(CoreError::LlmTransient("http 502: bad gateway".to_owned()))
            } else {
                Ok(CompletionResponse {
                    content: "ok from fallback".to_owned(),
                    model: "mock".to_owned(),
                    usage: Default::default(),
                    finish_reason: Some("stop".to_owned()),
                })
            }
        }

        fn context_limit(&self) -> usize {
            128_000
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    struct MockExecutor {
        calls: Mutex<Vec<ToolCall>>,
    }

    #[async_trait]
    impl ToolExecutor for MockExecutor {
        async fn execute(
            &self,
            _run_id: &str,
            call: &ToolCall,
            _tab: Option<&BrowserUserTab>,
        ) -> Result<Value, ToolDispatchError> {
            self.calls.lock().push(call.clone());
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn loop_with_provider(provider: Arc<dyn LLMProvider>) -> ReplyLoop {
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert("mock".to_owned(), provider);
        let dispatcher: Arc<dyn ToolExecutor> = Arc::new(MockExecutor { calls: Mutex::new(vec![]) });
        ReplyLoop::new(providers, vec!["mock".to_owned()], dispatcher, true)
    }

    /// Returns a canned evidence payload for whichever URL the caller extracted.
    struct ResearchExecutor;

    #[async_trait]
    impl ToolExecutor for ResearchExecutor {
        async fn execute(
            &self,
            _run_id: &str,
            call: &ToolCall,
            _tab: Option<&BrowserUserTab>,
        ) -> Result<Value, ToolDispatchError> {
            let url = call.input.get("url").and_then(Value::as_str).unwrap_or_default().to_owned();
            Ok(serde_json::json!({
                "url": url,
                "mode": "text",
                "title": "RWA Tokenization Surges",
                "excerpt": "Tokenization of real world assets rose sharply across exchanges this week \
                             as stablecoin issuers expanded on-chain treasury products.",
                "diagnostics": {"status": "ok", "word_count": 150},
            }))
        }
    }

    #[tokio::test]
    async fn plain_chat_completes_successfully() {
        let provider = Arc::new(MockProvider {
            responses: vec!["Pointer aliasing means two pointers refer to the same memory."],
            index: AtomicUsize::new(0),
        });
        let reply_loop = loop_with_provider(provider);
        let store = InMemoryStore::default();
        let outcome = reply_loop.run("run-1", &store, "Explain pointer aliasing").await.unwrap();
        assert_eq!(outcome.completion_reason, CompletionReason::Success);
        assert!(outcome.content.contains("Pointer aliasing"));
        assert!(outcome.events.iter().any(|e| e.event_type == "run.completed"));
    }

    #[tokio::test]
    async fn tool_call_is_dispatched_and_reply_completes() {
        let provider = Arc::new(MockProvider {
            responses: vec![
                "```tool\n{\"tool_name\": \"editor.write\", \"input\": {\"path\": \"a.txt\", \"content\": \"hi\"}}\n```",
                "Done.",
            ],
            index: AtomicUsize::new(0),
        });
        let reply_loop = loop_with_provider(provider);
        let store = InMemoryStore::default();
        let outcome = reply_loop.run("run-2", &store, "please write a file").await.unwrap();
        assert_eq!(outcome.completion_reason, CompletionReason::Success);
        assert_eq!(outcome.content, "Done.");
    }

    #[tokio::test]
    async fn incomplete_fence_recovers_then_succeeds() {
        let provider = Arc::new(MockProvider {
            responses: vec!["```tool\n{\"tool_name\": \"editor.read\"", "All good now."],
            index: AtomicUsize::new(0),
        });
        let reply_loop = loop_with_provider(provider);
        let store = InMemoryStore::default();
        let outcome = reply_loop.run("run-3", &store, "tell me something interesting").await.unwrap();
        assert_eq!(outcome.completion_reason, CompletionReason::Success);
        assert_eq!(outcome.content, "All good now.");
    }

    #[tokio::test]
    async fn incomplete_fence_exhausts_recovery_budget() {
        let provider = Arc::new(MockProvider {
            responses: vec![
                "```tool\n{\"tool_name\": \"editor.read\"",
                "```tool\n{\"tool_name\": \"editor.read\"",
            ],
            index: AtomicUsize::new(0),
        });
        let reply_loop = loop_with_provider(provider);
        let store = InMemoryStore::default();
        let outcome = reply_loop.run("run-4", &store, "please read a file").await.unwrap();
        assert_eq!(outcome.completion_reason, CompletionReason::InvalidToolPayload);
    }

    #[tokio::test]
    async fn provider_failover_activates_on_bad_gateway() {
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(
            "openai".to_owned(),
            Arc::new(FailThenOkProvider {
                fail_times: 99,
                calls: AtomicUsize::new(0),
            }),
        );
        providers.insert(
            "openrouter".to_owned(),
            Arc::new(FailThenOkProvider {
                fail_times: 0,
                calls: AtomicUsize::new(0),
            }),
        );
        let dispatcher: Arc<dyn ToolExecutor> = Arc::new(MockExecutor { calls: Mutex::new(vec![]) });
        let reply_loop = ReplyLoop::new(providers, vec!["openai".to_owned(), "openrouter".to_owned()], dispatcher, false)
            .with_config(ReplyLoopConfig {
                backoff_steps: [Duration::from_millis(1), Duration::from_millis(1)],
                ..ReplyLoopConfig::default()
            });
        let store = InMemoryStore::default();
        let outcome = reply_loop.run("run-5", &store, "hello").await.unwrap();
        assert_eq!(outcome.content, "ok from fallback");
        let failed_events: Vec<_> = outcome
            .events
            .iter()
            .filter(|e| e.event_type == "model.request.failed")
            .collect();
        assert_eq!(failed_events.len(), 2);
    }

    #[tokio::test]
    async fn research_request_completes_once_enough_distinct_sources_are_extracted() {
        let response = "```tool\n{\"tool_calls\": [\
            {\"tool_name\": \"browser.extract\", \"input\": {\"url\": \"https://example.com/2026/02/rwa-surge-1\"}},\
            {\"tool_name\": \"browser.extract\", \"input\": {\"url\": \"https://example.com/2026/02/rwa-surge-2\"}},\
            {\"tool_name\": \"browser.extract\", \"input\": {\"url\": \"https://example.com/2026/02/rwa-surge-3\"}},\
            {\"tool_name\": \"browser.extract\", \"input\": {\"url\": \"https://example.com/2026/02/rwa-surge-4\"}},\
            {\"tool_name\": \"browser.extract\", \"input\": {\"url\": \"https://example.com/2026/02/rwa-surge-5\"}}\
        ]}\n```";
        let provider = Arc::new(MockProvider {
            responses: vec![response],
            index: AtomicUsize::new(0),
        });
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert("mock".to_owned(), provider);
        let dispatcher: Arc<dyn ToolExecutor> = Arc::new(ResearchExecutor);
        let reply_loop = ReplyLoop::new(providers, vec!["mock".to_owned()], dispatcher, true);
        let store = InMemoryStore::default();
        let outcome = reply_loop
            .run(
                "run-6",
                &store,
                "Browse the web and give me sources for the top 5 RWA news for February 2026",
            )
            .await
            .unwrap();
        assert_eq!(outcome.completion_reason, CompletionReason::ResearchEvidenceComplete);
        assert!(outcome.content.contains("example.com"));
    }
}
