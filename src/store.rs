//! Persistent store operation surface.
//!
//! Production backing (SQL/embedded DB) is out of scope; `InMemoryStore` is
//! the reference implementation used by tests, the local CLI, and the
//! workflow shim. Layout is opaque to callers beyond this trait.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ProviderConfig;
use crate::error::CoreError;
use crate::event::RunEvent;
use crate::message::Message;

/// A single memory-subsystem recall hit.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    pub enabled: bool,
    pub recall_limit: usize,
}

pub trait Store: Send + Sync {
    fn list_messages(&self, run_id: &str) -> Result<Vec<Message>, CoreError>;
    fn append_message(&self, run_id: &str, message: Message) -> Result<(), CoreError>;

    fn list_events(&self, run_id: &str, after_seq: u64) -> Result<Vec<RunEvent>, CoreError>;
    fn next_seq(&self, run_id: &str) -> Result<u64, CoreError>;
    fn append_event(&self, event: RunEvent) -> Result<(), CoreError>;

    fn get_llm_settings(&self, run_id: &str) -> Result<ProviderConfig, CoreError>;
    fn get_memory_settings(&self, run_id: &str) -> Result<MemorySettings, CoreError>;
    fn search_memory(&self, run_id: &str, query: &str) -> Result<Vec<MemoryEntry>, CoreError>;
}

#[derive(Default)]
struct RunState {
    messages: Vec<Message>,
    events: Vec<RunEvent>,
    next_seq: u64,
}

/// `parking_lot`-guarded in-memory implementation of [`Store`].
pub struct InMemoryStore {
    runs: Mutex<HashMap<String, RunState>>,
    provider: ProviderConfig,
    memory: MemorySettings,
}

impl InMemoryStore {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            provider,
            memory: MemorySettings {
                enabled: false,
                recall_limit: 10,
            },
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(ProviderConfig::default())
    }
}

pub fn new_shared_in_memory_store(provider: ProviderConfig) -> Arc<dyn Store> {
    Arc::new(InMemoryStore::new(provider))
}

impl Store for InMemoryStore {
    fn list_messages(&self, run_id: &str) -> Result<Vec<Message>, CoreError> {
        Ok(self
            .runs
            .lock()
            .get(run_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }

    fn append_message(&self, run_id: &str, message: Message) -> Result<(), CoreError> {
        self.runs
            .lock()
            .entry(run_id.to_owned())
            .or_default()
            .messages
            .push(message);
        Ok(())
    }

    fn list_events(&self, run_id: &str, after_seq: u64) -> Result<Vec<RunEvent>, CoreError> {
        Ok(self
            .runs
            .lock()
            .get(run_id)
            .map(|s| {
                s.events
                    .iter()
                    .filter(|e| e.seq > after_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn next_seq(&self, run_id: &str) -> Result<u64, CoreError> {
        let mut runs = self.runs.lock();
        let state = runs.entry(run_id.to_owned()).or_default();
        state.next_seq += 1;
        Ok(state.next_seq)
    }

    fn append_event(&self, event: RunEvent) -> Result<(), CoreError> {
        self.runs
            .lock()
            .entry(event.run_id.clone())
            .or_default()
            .events
            .push(event);
        Ok(())
    }

    fn get_llm_settings(&self, _run_id: &str) -> Result<ProviderConfig, CoreError> {
        Ok(self.provider.clone())
    }

    fn get_memory_settings(&self, _run_id: &str) -> Result<MemorySettings, CoreError> {
        Ok(self.memory.clone())
    }

    fn search_memory(&self, _run_id: &str, _query: &str) -> Result<Vec<MemoryEntry>, CoreError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_seq_is_gap_free_and_per_run() {
        let store = InMemoryStore::default();
        assert_eq!(store.next_seq("run-a").unwrap(), 1);
        assert_eq!(store.next_seq("run-a").unwrap(), 2);
        assert_eq!(store.next_seq("run-b").unwrap(), 1);
    }

    #[test]
    fn list_events_filters_by_after_seq() {
        let store = InMemoryStore::default();
        store
            .append_event(RunEvent::new("run-a", 1, "run.started"))
            .unwrap();
        store
            .append_event(RunEvent::new("run-a", 2, "run.completed"))
            .unwrap();
        let events = store.list_events("run-a", 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 2);
    }
}
