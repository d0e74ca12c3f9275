//! Core library: conversation windowing, the tool-call protocol, tool
//! dispatch, LLM providers, the research-evidence engine, and the
//! reply loop that ties them together.

pub mod activities;
pub mod config;
pub mod conversation_window;
pub mod error;
pub mod event;
pub mod logging;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod reply_loop;
pub mod research;
pub mod store;
pub mod tool_call;
pub mod tool_dispatcher;
pub mod workflow;

pub use error::{CompletionReason, CoreError};
pub use event::{AppEvent, EventBus, RunEvent};
pub use message::{Message, MessageRole};
pub use prompt::{MemoryPromptBuilder, SystemPromptBuilder};
pub use reply_loop::{ReplyLoop, ReplyLoopConfig, ReplyOutcome};
pub use store::Store;
