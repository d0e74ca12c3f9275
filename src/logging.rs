//! Structured logging setup.
//!
//! A daily-rolling, non-blocking file appender plus an `EnvFilter`-driven
//! stdout layer. The `WorkerGuard` for the file appender is kept alive for
//! the process lifetime via a `OnceLock`.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initializes the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init(log_dir: &std::path::Path) {
    if GUARD.get().is_some() {
        return;
    }

    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "meridian-core.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = GUARD.set(guard);
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "meridian-core started");
    }
}
