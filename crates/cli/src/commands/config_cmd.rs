//! `quarry config`: show or validate the effective configuration.

use super::load_config;
use std::path::Path;

pub fn run(config_path: Option<&Path>, check: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if check {
        return Ok(());
    }

    let engine = &config.engine;
    let governor = &config.governor;
    println!("  Provider:     {}", config.provider);
    println!("  Model:        {}", config.model);
    println!("  Distiller:    {}", config.distiller_model());
    println!(
        "  API key:      {}",
        if config.has_api_key() { "set" } else { "missing" }
    );
    println!(
        "  Steps:        warn after {}, cap at {}",
        engine.soft_step_threshold, engine.hard_step_cap
    );
    println!("  Context:      {} messages", engine.context_window);
    println!("  Cache:        threshold {:.2}", engine.cache_threshold);
    println!(
        "  Governor:     {}ms between calls, {} retries, {}s timeout",
        governor.min_interval_ms, governor.max_retries, governor.call_timeout_secs
    );
    println!("  Search:       {}", config.capabilities.search_endpoint);
    println!(
        "  Artifacts:    {}",
        config.capabilities.artifacts_path().display()
    );
    println!("  Storage:      {}", config.storage.backend);

    Ok(())
}
