//! Web search capability backed by a SearxNG-style JSON endpoint.
//!
//! Sends `GET {endpoint}?q=<query>&format=json` and returns a compact JSON
//! list of `{title, url, snippet}` results.

use crate::http_error;
use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::{Capability, InvocationContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

const NAME: &str = "web_search";

pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl WebSearch {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, max_results: usize) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            max_results: max_results.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Parse an endpoint response body into at most `limit` results.
pub fn parse_results(body: &str, limit: usize) -> Result<Vec<SearchResult>, serde_json::Error> {
    let response: SearxResponse = serde_json::from_str(body)?;
    Ok(response
        .results
        .into_iter()
        .filter(|r| !r.url.is_empty())
        .take(limit)
        .map(|r| SearchResult {
            title: r.title,
            url: r.url,
            snippet: r.content,
        })
        .collect())
}

#[async_trait]
impl Capability for WebSearch {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Search the web for real-time information, news, or specific facts. \
         Returns titles, URLs, and snippets. Use scrape_site on a URL to read it in full."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::invalid(NAME, "'query' must be a non-empty string"))?;

        debug!(query, endpoint = %self.endpoint, "Searching");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| http_error(NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                ToolError::Network {
                    capability: NAME.into(),
                    reason: format!("search endpoint returned {status}"),
                }
            } else {
                ToolError::failed(NAME, format!("search endpoint returned {status}"))
            });
        }

        let body = response.text().await.map_err(|e| http_error(NAME, e))?;
        let results = parse_results(&body, self.max_results)
            .map_err(|e| ToolError::failed(NAME, format!("unreadable search response: {e}")))?;

        if results.is_empty() {
            return Ok(format!("No results found for '{query}'."));
        }
        serde_json::to_string(&results).map_err(|e| ToolError::failed(NAME, e.to_string()))
    }
}
