//! Built-in capabilities for Quarry.
//!
//! Capabilities give the reasoning policy its reach: search the web, read
//! pages and local documents, query the user's stored documents, compute,
//! and save artifacts for the user.

pub mod calculator;
pub mod html;
pub mod path;
pub mod query_user_documents;
pub mod read_document;
pub mod save_artifact;
pub mod scrape_site;
pub mod web_search;

use quarry_config::AppConfig;
use quarry_core::error::{Error, Result, ToolError};
use quarry_core::memory::KnowledgeStore;
use quarry_core::tool::CapabilityRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use calculator::Calculate;
pub use query_user_documents::QueryUserDocuments;
pub use read_document::ReadDocument;
pub use save_artifact::SaveArtifact;
pub use scrape_site::ScrapeSite;
pub use web_search::WebSearch;

const USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));

/// Map a transport failure to a capability error.
///
/// Connection problems and timeouts are transient; everything else is not.
pub(crate) fn http_error(capability: &str, e: reqwest::Error) -> ToolError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ToolError::Network {
            capability: capability.into(),
            reason: e.to_string(),
        }
    } else {
        ToolError::failed(capability, e.to_string())
    }
}

fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::config(format!("capability HTTP client: {e}")))
}

/// Create the registry with every built-in capability.
///
/// Fails only when the shared HTTP client cannot be built.
pub fn default_registry(
    config: &AppConfig,
    knowledge: Arc<dyn KnowledgeStore>,
) -> Result<CapabilityRegistry> {
    let caps = &config.capabilities;
    let client = build_client(
        USER_AGENT,
        Duration::from_secs(config.governor.capability_timeout_secs),
    )?;

    let mut registry = CapabilityRegistry::new();
    registry.register(Box::new(WebSearch::new(
        client.clone(),
        &caps.search_endpoint,
        caps.search_max_results,
    )));
    registry.register(Box::new(ScrapeSite::new(client)));
    registry.register(Box::new(ReadDocument::new(
        caps.documents_root.as_ref().map(PathBuf::from),
    )));
    registry.register(Box::new(QueryUserDocuments::new(
        knowledge,
        config.engine.retrieval_top_k,
    )));
    registry.register(Box::new(Calculate));
    registry.register(Box::new(SaveArtifact::new(
        caps.artifacts_path(),
        caps.artifact_extensions.clone(),
    )));
    Ok(registry)
}
