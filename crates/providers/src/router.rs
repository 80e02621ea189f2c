//! Provider construction from configuration.
//!
//! Builds the reasoning-policy provider and the distiller provider, both
//! governed and sharing a single rate ceiling.

use crate::governed::{GovernedProvider, RateLimiter};
use crate::openai_compat::OpenAiCompatProvider;
use quarry_config::AppConfig;
use quarry_core::error::{Error, Result};
use quarry_core::provider::Provider;
use std::sync::Arc;
use tracing::info;

/// The two provider handles a run needs.
pub struct ProviderSet {
    /// Used for REASON steps
    pub policy: Arc<dyn Provider>,
    /// Used for context distillation
    pub distiller: Arc<dyn Provider>,
}

/// Build the governed providers from configuration.
///
/// A missing API key is a configuration error, reported before any run starts.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderSet> {
    let api_key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::config(format!(
                "no API key for provider '{}' (set api_key or QUARRY_API_KEY)",
                config.provider
            ))
        })?;

    let base_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider));

    info!(provider = %config.provider, base_url = %base_url, model = %config.model, "Building provider");

    let backend: Arc<dyn Provider> = Arc::new(
        OpenAiCompatProvider::new(&config.provider, &base_url, api_key)
            .map_err(|e| Error::config(e.to_string()))?,
    );

    let governor = &config.governor;
    let limiter = Arc::new(RateLimiter::new(governor.min_interval()));
    let governed = || {
        GovernedProvider::new(backend.clone())
            .with_limiter(limiter.clone())
            .with_retry(governor.retry_policy())
            .with_timeout(governor.call_timeout())
    };

    Ok(ProviderSet {
        policy: Arc::new(governed()),
        distiller: Arc::new(governed()),
    })
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
