//! Durable run events plus an in-process broadcast mirror.
//!
//! `RunEvent` is the durable record appended to the `Store`; `AppEvent` is
//! the same data republished on an in-process `tokio::sync::broadcast`
//! channel for local observers (tray icon, log tail, a CLI watch command).
//! The bus is best-effort: a lagged or absent subscriber never affects the
//! run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: String,
    pub trace_id: Uuid,
    pub payload: HashMap<String, Value>,
}

impl RunEvent {
    pub fn new(run_id: impl Into<String>, seq: u64, event_type: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            seq,
            event_type: event_type.into(),
            timestamp: chrono::Utc::now(),
            source: "llm".to_owned(),
            trace_id: Uuid::new_v4(),
            payload: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn completion_reason(&self) -> Option<&str> {
        self.payload.get("completion_reason").and_then(Value::as_str)
    }
}

/// Lightweight clone of a `RunEvent` published on the in-process bus.
#[derive(Debug, Clone)]
pub struct AppEvent {
    pub run_id: String,
    pub event_type: String,
    pub payload: HashMap<String, Value>,
}

impl From<&RunEvent> for AppEvent {
    fn from(e: &RunEvent) -> Self {
        Self {
            run_id: e.run_id.clone(),
            event_type: e.event_type.clone(),
            payload: e.payload.clone(),
        }
    }
}

/// In-process publish/subscribe mirror of the durable event stream.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &RunEvent);
    fn subscribe(&self) -> broadcast::Receiver<AppEvent>;
}

pub struct TokioBroadcastBus {
    sender: broadcast::Sender<AppEvent>,
}

impl TokioBroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for TokioBroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for TokioBroadcastBus {
    fn publish(&self, event: &RunEvent) {
        // No subscribers is not an error; best-effort only.
        let _ = self.sender.send(event.into());
    }

    fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = TokioBroadcastBus::default();
        bus.publish(&RunEvent::new("run-1", 1, "run.completed"));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = TokioBroadcastBus::default();
        let mut rx = bus.subscribe();
        bus.publish(&RunEvent::new("run-1", 1, "run.completed").with_payload(
            "completion_reason",
            Value::String("success".into()),
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "run.completed");
        assert_eq!(
            event.payload.get("completion_reason").and_then(Value::as_str),
            Some("success")
        );
    }
}
