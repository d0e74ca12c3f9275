//! In-process signal-driven workflow shim.
//!
//! A real deployment would run Plan/Execute/Verify under a durable workflow
//! engine; this crate doesn't depend on one, so [`WorkflowRegistry`]
//! reproduces the piece of that contract the reply loop actually needs:
//! one task per `run_id`, spawned lazily on first signal, processing
//! signalled user turns one at a time via an mpsc channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::activities;
use crate::error::CoreError;
use crate::event::RunEvent;
use crate::reply_loop::ReplyLoop;
use crate::store::Store;

/// A handle to a running workflow task; `signal` enqueues one user turn.
#[derive(Clone)]
pub struct WorkflowHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl WorkflowHandle {
    pub fn signal(&self, user_message: impl Into<String>) -> Result<(), CoreError> {
        self.sender
            .send(user_message.into())
            .map_err(|_| CoreError::Activity("workflow task has stopped".to_owned()))
    }
}

/// Keeps one workflow task per `run_id`, spawning it on first signal.
pub struct WorkflowRegistry {
    store: Arc<dyn Store>,
    reply_loop: Arc<ReplyLoop>,
    handles: Mutex<HashMap<String, WorkflowHandle>>,
}

impl WorkflowRegistry {
    pub fn new(store: Arc<dyn Store>, reply_loop: Arc<ReplyLoop>) -> Arc<Self> {
        Arc::new(Self {
            store,
            reply_loop,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Signals `run_id` with one user turn, spawning its task if this is the
    /// first signal for that run.
    pub fn signal(self: &Arc<Self>, run_id: &str, user_message: impl Into<String>) -> Result<(), CoreError> {
        let handle = {
            let mut handles = self.handles.lock();
            handles
                .entry(run_id.to_owned())
                .or_insert_with(|| self.clone().spawn(run_id.to_owned()))
                .clone()
        };
        handle.signal(user_message)
    }

    fn spawn(self: Arc<Self>, run_id: String) -> WorkflowHandle {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let store = self.store.clone();
        let reply_loop = self.reply_loop.clone();
        let task_run_id = run_id.clone();
        tokio::spawn(async move {
            while let Some(user_message) = receiver.recv().await {
                let result: Result<RunEvent, CoreError> =
                    activities::plan_execute_verify(&task_run_id, store.clone(), reply_loop.as_ref(), &user_message)
                        .await;
                if let Err(err) = result {
                    tracing::error!(run_id = %task_run_id, error = %err, "workflow turn failed to produce a terminal event");
                }
            }
        });
        WorkflowHandle { sender }
    }
}
