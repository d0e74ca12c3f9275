//! Local CLI driving Plan -> Execute -> Verify through the workflow shim
//! against an in-memory store, for interactive smoke-testing without a
//! control plane.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use meridian_core::config::AppConfig;
use meridian_core::event::RunEvent;
use meridian_core::provider::openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};
use meridian_core::provider::LLMProvider;
use meridian_core::reply_loop::ReplyLoop;
use meridian_core::store::{new_shared_in_memory_store, Store};
use meridian_core::tool_dispatcher::ToolDispatcher;
use meridian_core::workflow::WorkflowRegistry;

#[derive(Parser)]
#[command(name = "meridian", about = "Run one turn through Plan -> Execute -> Verify")]
struct Args {
    /// The user message to send.
    message: String,

    /// Run identifier; a fresh one is minted if omitted.
    #[arg(long)]
    run_id: Option<String>,

    /// Path to a config.toml; defaults to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for log output.
    #[arg(long, default_value = "./logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    meridian_core::logging::init(&args.log_dir);

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let run_id = args.run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let store = new_shared_in_memory_store(config.provider.clone());

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAICompatibleProvider::new(
        OpenAICompatibleConfig::openai(api_key),
        "openai",
    )?);
    let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
    providers.insert("openai".to_owned(), provider);

    let dispatcher = Arc::new(ToolDispatcher::new(config.tool_runner.base_url.clone()));
    let tool_runner_configured = dispatcher.is_configured();
    let reply_loop = Arc::new(ReplyLoop::new(
        providers,
        vec![format!("openai:{}", config.provider.default_model)],
        dispatcher,
        tool_runner_configured,
    ));

    let registry = WorkflowRegistry::new(store.clone(), reply_loop);
    registry.signal(&run_id, args.message)?;

    wait_for_terminal_event(store.as_ref(), &run_id).await?;
    print_transcript(store.as_ref(), &run_id)?;
    Ok(())
}

async fn wait_for_terminal_event(store: &dyn Store, run_id: &str) -> anyhow::Result<()> {
    for _ in 0..200 {
        let events = store.list_events(run_id, 0)?;
        if events.iter().any(is_terminal) {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    anyhow::bail!("timed out waiting for run {run_id} to finish")
}

fn is_terminal(event: &RunEvent) -> bool {
    matches!(event.event_type.as_str(), "run.completed" | "run.partial" | "run.failed")
}

fn print_transcript(store: &dyn Store, run_id: &str) -> anyhow::Result<()> {
    for message in store.list_messages(run_id)? {
        println!("[{:?}] {}", message.role, message.content);
    }
    Ok(())
}
