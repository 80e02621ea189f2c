//! Configuration loading, validation, and management for Quarry.
//!
//! Loads configuration from `~/.quarry/config.toml` with environment
//! variable overrides. Validates all settings at startup so a bad value is
//! reported before any run begins.

use quarry_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.quarry/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the reasoning-policy service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name (selects the default base URL)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Reasoning model
    #[serde(default = "default_model")]
    pub model: String,

    /// Reasoning temperature
    #[serde(default)]
    pub temperature: f32,

    /// Max tokens per reasoning response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Orchestration limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Context distillation
    #[serde(default)]
    pub distiller: DistillerConfig,

    /// Rate ceiling, retry, and timeouts for external calls
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Built-in capability settings
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    /// Conversation storage
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-2.5-flash-lite".into()
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("engine", &self.engine)
            .field("distiller", &self.distiller)
            .field("governor", &self.governor)
            .field("capabilities", &self.capabilities)
            .field("storage", &self.storage)
            .finish()
    }
}

/// Step budget, context window, and cache-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Past this many steps, a convergence warning is injected before reasoning
    #[serde(default = "default_soft_step_threshold")]
    pub soft_step_threshold: u32,

    /// The REASON step whose response is forced terminal
    #[serde(default = "default_hard_step_cap")]
    pub hard_step_cap: u32,

    /// Messages sent to the policy per step (anchor + most recent)
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Minimum similarity for a cached answer to be reused
    #[serde(default = "default_cache_threshold")]
    pub cache_threshold: f32,

    /// Snippets requested from the knowledge store
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    /// Prior thread messages folded into the run's context
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,

    /// Consecutive failed REASON calls before the run gives up
    #[serde(default = "default_max_consecutive_policy_failures")]
    pub max_consecutive_policy_failures: u32,
}

fn default_soft_step_threshold() -> u32 {
    8
}
fn default_hard_step_cap() -> u32 {
    12
}
fn default_context_window() -> usize {
    5
}
fn default_cache_threshold() -> f32 {
    0.85
}
fn default_retrieval_top_k() -> usize {
    5
}
fn default_history_messages() -> usize {
    6
}
fn default_max_consecutive_policy_failures() -> u32 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            soft_step_threshold: default_soft_step_threshold(),
            hard_step_cap: default_hard_step_cap(),
            context_window: default_context_window(),
            cache_threshold: default_cache_threshold(),
            retrieval_top_k: default_retrieval_top_k(),
            history_messages: default_history_messages(),
            max_consecutive_policy_failures: default_max_consecutive_policy_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillerConfig {
    /// Raw text is truncated to this many characters before distillation
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Bulk observations longer than this are distilled
    #[serde(default = "default_large_result_chars")]
    pub large_result_chars: usize,

    #[serde(default)]
    pub temperature: f32,

    /// Distiller model (defaults to the reasoning model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_max_input_chars() -> usize {
    15_000
}
fn default_large_result_chars() -> usize {
    1_500
}

impl Default for DistillerConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            large_result_chars: default_large_result_chars(),
            temperature: 0.0,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Minimum spacing between reasoning-service calls
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-call timeout for the reasoning service
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Per-call timeout for capability handlers
    #[serde(default = "default_call_timeout_secs")]
    pub capability_timeout_secs: u64,
}

fn default_min_interval_ms() -> u64 {
    2_000
}
fn default_max_retries() -> u32 {
    6
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_call_timeout_secs() -> u64 {
    60
}

impl GovernorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            capability_timeout_secs: default_call_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// SearxNG-style JSON search endpoint (`{endpoint}?q=...&format=json`)
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,

    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,

    /// If set, `read_document` may only read below this directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_root: Option<String>,

    /// Where generated artifacts are written and tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<String>,

    /// File extensions counted as artifacts
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,
}

fn default_search_endpoint() -> String {
    "http://localhost:8888/search".into()
}
fn default_search_max_results() -> usize {
    5
}
fn default_artifact_extensions() -> Vec<String> {
    ["png", "csv", "md", "json", "svg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl CapabilitiesConfig {
    /// The artifact directory, defaulting to `~/.quarry/artifacts`.
    pub fn artifacts_path(&self) -> PathBuf {
        self.artifacts_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("artifacts"))
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            search_endpoint: default_search_endpoint(),
            search_max_results: default_search_max_results(),
            documents_root: None,
            artifacts_dir: None,
            artifact_extensions: default_artifact_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory", "file", or "sqlite"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// File or database path for persistent backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_storage_backend() -> String {
    "file".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.quarry/config.toml).
    ///
    /// Also checks environment variables for the API key:
    /// - `QUARRY_API_KEY` (highest priority)
    /// - `GEMINI_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path())
    }

    /// Load from `path`, then apply the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// The default config file location.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("QUARRY_API_KEY")
                .ok()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(provider) = std::env::var("QUARRY_PROVIDER") {
            self.provider = provider;
        }
        if let Ok(model) = std::env::var("QUARRY_MODEL") {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".quarry")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        let engine = &self.engine;
        if engine.hard_step_cap == 0 {
            return Err(ConfigError::ValidationError(
                "engine.hard_step_cap must be at least 1".into(),
            ));
        }
        if engine.soft_step_threshold >= engine.hard_step_cap {
            return Err(ConfigError::ValidationError(
                "engine.soft_step_threshold must be below engine.hard_step_cap".into(),
            ));
        }
        if engine.context_window < 2 {
            return Err(ConfigError::ValidationError(
                "engine.context_window must keep the anchor plus at least one message".into(),
            ));
        }
        if !(0.0..=1.0).contains(&engine.cache_threshold) {
            return Err(ConfigError::ValidationError(
                "engine.cache_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if self.distiller.max_input_chars == 0 {
            return Err(ConfigError::ValidationError(
                "distiller.max_input_chars must be > 0".into(),
            ));
        }
        if !matches!(self.storage.backend.as_str(), "memory" | "file" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend '{}' is not one of memory, file, sqlite",
                self.storage.backend
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Model used by the context distiller.
    pub fn distiller_model(&self) -> &str {
        self.distiller.model.as_deref().unwrap_or(&self.model)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            engine: EngineConfig::default(),
            distiller: DistillerConfig::default(),
            governor: GovernorConfig::default(),
            capabilities: CapabilitiesConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.engine.soft_step_threshold, 8);
        assert_eq!(config.engine.hard_step_cap, 12);
        assert_eq!(config.engine.context_window, 5);
        assert!((config.engine.cache_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.distiller.max_input_chars, 15_000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider, config.provider);
        assert_eq!(parsed.engine.hard_step_cap, config.engine.hard_step_cap);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = AppConfig::from_toml(
            r#"
            model = "gpt-4o-mini"
            provider = "openai"

            [engine]
            hard_step_cap = 20
            soft_step_threshold = 15
            "#,
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.engine.hard_step_cap, 20);
        assert_eq!(config.engine.context_window, 5);
        assert_eq!(config.governor.max_retries, 6);
    }

    #[test]
    fn soft_threshold_must_be_below_hard_cap() {
        let mut config = AppConfig::default();
        config.engine.soft_step_threshold = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn context_window_must_keep_anchor_and_one_more() {
        let mut config = AppConfig::default();
        config.engine.context_window = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_storage_backend_rejected() {
        let err = AppConfig::from_toml("[storage]\nbackend = \"mongo\"").unwrap_err();
        assert!(err.to_string().contains("mongo"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider, "gemini");
    }

    #[test]
    fn load_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [unclosed").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref path, .. } if path.ends_with("config.toml")));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret-123".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn blank_api_key_does_not_count() {
        let config = AppConfig {
            api_key: Some("   ".into()),
            ..AppConfig::default()
        };
        assert!(!config.has_api_key());
    }

    #[test]
    fn governor_conversions() {
        let gov = GovernorConfig::default();
        let policy = gov.retry_policy();
        assert_eq!(policy.max_retries, 6);
        assert_eq!(gov.min_interval(), Duration::from_secs(2));
        assert_eq!(gov.call_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn distiller_model_falls_back_to_reasoning_model() {
        let mut config = AppConfig::default();
        assert_eq!(config.distiller_model(), "gemini-2.5-flash-lite");
        config.distiller.model = Some("small".into());
        assert_eq!(config.distiller_model(), "small");
    }
}
