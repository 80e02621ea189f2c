//! Page scraping capability: fetch a URL and return its readable text.
//!
//! Output is bulk text; large pages are distilled before they enter the
//! run's context.

use crate::html::{html_to_text, looks_like_html};
use crate::http_error;
use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::{Capability, InvocationContext};
use tracing::debug;

const NAME: &str = "scrape_site";

/// Default ceiling on bytes read from a page body.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub struct ScrapeSite {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ScrapeSite {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// Read at most `cap` bytes of the body, chunk by chunk.
///
/// Stops as soon as the cap is reached; the rest of the body is never
/// received.
async fn read_capped(mut response: reqwest::Response, cap: usize) -> Result<Vec<u8>, ToolError> {
    let mut body = Vec::with_capacity(cap.min(64 * 1024));
    while let Some(chunk) = response.chunk().await.map_err(|e| http_error(NAME, e))? {
        let room = cap - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            debug!(cap, "Page body truncated");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn validate_url(url: &str) -> Result<(), ToolError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ToolError::invalid(NAME, "URL must start with http:// or https://"));
    }
    Ok(())
}

#[async_trait]
impl Capability for ScrapeSite {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Read the full content of a specific webpage. \
         Use this after getting a URL from a search to understand the details."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to read"
                }
            },
            "required": ["url"]
        })
    }

    fn bulk_output(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::invalid(NAME, "Missing 'url' argument"))?;
        validate_url(url)?;

        debug!(url, "Scraping page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_error(NAME, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ToolError::Network {
                capability: NAME.into(),
                reason: format!("{url} returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(ToolError::failed(NAME, format!("{url} returned {status}")));
        }

        let html_header = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));

        let bytes = read_capped(response, self.max_body_bytes).await?;
        let body = String::from_utf8_lossy(&bytes);
        let is_html = html_header || looks_like_html(&body);

        let text = if is_html { html_to_text(&body) } else { body.trim().to_string() };
        if text.is_empty() {
            return Err(ToolError::failed(NAME, format!("{url} has no readable text")));
        }
        Ok(text)
    }
}
