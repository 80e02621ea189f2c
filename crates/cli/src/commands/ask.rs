//! `quarry ask`: run one research query.

use super::{load_config, open_stores};
use anyhow::Context;
use quarry_agent::{CancellationToken, Engine};
use quarry_config::AppConfig;
use quarry_core::error::Error;
use quarry_core::memory::KnowledgeStore;
use quarry_memory::InMemoryKnowledge;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AskArgs {
    pub query: String,
    pub thread: String,
    pub user: String,
    pub documents: Option<PathBuf>,
    pub json: bool,
}

pub async fn run(config_path: Option<&Path>, args: AskArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    QUARRY_API_KEY   (any provider)");
        eprintln!("    GEMINI_API_KEY   (provider = \"gemini\", the default)");
        eprintln!("    OPENAI_API_KEY   (provider = \"openai\")");
        eprintln!();
        eprintln!("  Or add api_key to {}", AppConfig::config_path().display());
        eprintln!();
        anyhow::bail!("no API key found");
    }

    let knowledge = Arc::new(InMemoryKnowledge::new());
    if let Some(dir) = &args.documents {
        let chunks = knowledge
            .ingest_dir(&args.user, dir)
            .await
            .with_context(|| format!("failed to read documents from {}", dir.display()))?;
        info!(dir = %dir.display(), chunks, "Documents ingested");
    }
    let knowledge: Arc<dyn KnowledgeStore> = knowledge;

    let stores = open_stores(&config.storage).await?;
    let registry = Arc::new(quarry_tools::default_registry(&config, knowledge.clone())?);

    let engine = Engine::from_config(&config, registry)?
        .with_cache(stores.cache)
        .with_knowledge(knowledge)
        .with_conversations(stores.conversations);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    if !args.json {
        eprint!("  Researching...");
    }
    let result = engine
        .run_with_cancel(&args.query, &args.thread, &args.user, cancel)
        .await;
    if !args.json {
        eprint!("\r                \r");
    }

    let result = match result {
        Ok(result) => result,
        Err(Error::Cancelled) => anyhow::bail!("run cancelled"),
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.answer);
    if !result.artifacts.is_empty() {
        let dir = config.capabilities.artifacts_path();
        println!();
        println!("  Artifacts:");
        for name in &result.artifacts {
            println!("    {}", dir.join(name).display());
        }
    }
    eprintln!();
    eprintln!(
        "  [{} | {} steps | {} capability calls]",
        result.termination, result.steps, result.dispatches
    );

    Ok(())
}
