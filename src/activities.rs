//! Thin Plan / Execute / Verify activities around the reply loop.
//!
//! These mirror a durable-workflow activity shape (see [`crate::workflow`])
//! without needing an actual workflow engine: each activity is a plain
//! async function over a [`Store`] and emits the events a real orchestrator
//! would checkpoint between steps.

use std::sync::Arc;

use serde_json::Value;

use crate::error::CoreError;
use crate::event::{EventBus, RunEvent};
use crate::message::Message;
use crate::reply_loop::{ReplyLoop, ReplyOutcome};
use crate::store::Store;

const PLAN_KEYWORDS: &[(&str, &str)] = &[
    ("browse", "Gather evidence from the web"),
    ("search", "Gather evidence from the web"),
    ("research", "Gather evidence from the web"),
    ("file", "Inspect or modify the workspace filesystem"),
    ("write", "Produce requested artifacts"),
    ("run", "Execute a process and observe its output"),
];

/// Emits a keyword-derived plan outline as `step.planned` events and returns
/// the outline text. Always includes at least a "Respond to the user" step.
pub fn plan(
    run_id: &str,
    store: &dyn Store,
    user_message: &str,
    bus: Option<&Arc<dyn EventBus>>,
) -> Result<Vec<String>, CoreError> {
    let lowered = user_message.to_lowercase();
    let mut steps: Vec<String> = PLAN_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, step)| step.to_string())
        .collect();
    steps.dedup();
    steps.push("Respond to the user".to_owned());

    for (i, step) in steps.iter().enumerate() {
        let seq = store.next_seq(run_id)?;
        let event = RunEvent::new(run_id, seq, "step.planned")
            .with_payload("index", Value::from(i))
            .with_payload("description", Value::String(step.clone()));
        if let Some(bus) = bus {
            bus.publish(&event);
        }
        store.append_event(event)?;
    }
    Ok(steps)
}

/// Runs the reply loop for one user turn and persists the resulting
/// messages and events to `store`.
pub async fn execute(
    run_id: &str,
    store: &dyn Store,
    reply_loop: &ReplyLoop,
    user_message: &str,
) -> Result<ReplyOutcome, CoreError> {
    store.append_message(run_id, Message::user(user_message, 0))?;
    let outcome = reply_loop.run(run_id, store, user_message).await?;
    store.append_message(run_id, Message::assistant(outcome.content.clone(), 0))?;
    for event in &outcome.events {
        store.append_event(event.clone())?;
    }
    Ok(outcome)
}

/// Scans the persisted event stream for a terminal event. If a run ended
/// without one (e.g. the process was interrupted mid-loop), synthesizes a
/// `run.partial` with `activity_error` so downstream consumers never see a
/// run with no terminal event.
pub fn verify(run_id: &str, store: &dyn Store) -> Result<RunEvent, CoreError> {
    let events = store.list_events(run_id, 0)?;
    if let Some(terminal) = events
        .iter()
        .rev()
        .find(|e| matches!(e.event_type.as_str(), "run.completed" | "run.partial" | "run.failed"))
    {
        return Ok(terminal.clone());
    }

    let seq = store.next_seq(run_id)?;
    let synthesized = RunEvent::new(run_id, seq, "run.partial")
        .with_payload("completion_reason", Value::String("activity_error".to_owned()));
    store.append_event(synthesized.clone())?;
    Ok(synthesized)
}

/// Convenience wrapper driving Plan -> Execute -> Verify for one turn.
///
/// `verify` always runs, even when `plan`/`execute` fail: it's the one place
/// that guarantees a terminal event exists, so an activity error must never
/// skip past it.
pub async fn plan_execute_verify(
    run_id: &str,
    store: Arc<dyn Store>,
    reply_loop: &ReplyLoop,
    user_message: &str,
) -> Result<RunEvent, CoreError> {
    let bus = reply_loop.bus();
    let outcome: Result<(), CoreError> = async {
        plan(run_id, store.as_ref(), user_message, bus)?;
        execute(run_id, store.as_ref(), reply_loop, user_message).await?;
        Ok(())
    }
    .await;
    if let Err(err) = &outcome {
        tracing::error!(run_id, error = %err, "plan/execute failed before a terminal event was produced");
    }
    verify(run_id, store.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn plan_always_includes_respond_step() {
        let store = InMemoryStore::default();
        let steps = plan("run-1", &store, "what's the weather", None).unwrap();
        assert_eq!(steps, vec!["Respond to the user".to_owned()]);
        let events = store.list_events("run-1", 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "step.planned");
    }

    #[test]
    fn plan_detects_research_intent() {
        let store = InMemoryStore::default();
        let steps = plan("run-2", &store, "please research the latest RWA news", None).unwrap();
        assert!(steps.iter().any(|s| s.contains("Gather evidence")));
    }

    #[test]
    fn verify_synthesizes_partial_when_no_terminal_event_exists() {
        let store = InMemoryStore::default();
        let event = verify("run-3", &store).unwrap();
        assert_eq!(event.event_type, "run.partial");
        assert_eq!(event.completion_reason(), Some("activity_error"));
    }

    #[test]
    fn verify_returns_existing_terminal_event_unchanged() {
        let store = InMemoryStore::default();
        let seq = store.next_seq("run-4").unwrap();
        store
            .append_event(
                RunEvent::new("run-4", seq, "run.completed")
                    .with_payload("completion_reason", Value::String("success".to_owned())),
            )
            .unwrap();
        let event = verify("run-4", &store).unwrap();
        assert_eq!(event.event_type, "run.completed");
    }
}
