//! Document reading capability with path validation.

use crate::path::validate_path;
use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::{Capability, InvocationContext};
use std::path::PathBuf;

const NAME: &str = "read_document";

pub struct ReadDocument {
    /// Reads are confined below this directory when set.
    root: Option<PathBuf>,
}

impl ReadDocument {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Capability for ReadDocument {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Read the full text of a local document (plain text, Markdown, CSV, JSON). \
         Relative paths are resolved against the documents directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the document to read"
                }
            },
            "required": ["path"]
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
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::invalid(NAME, "Missing 'path' argument"))?;

        let resolved = validate_path(path, self.root.as_deref()).map_err(|e| {
            ToolError::PermissionDenied {
                capability: NAME.into(),
                reason: e.to_string(),
            }
        })?;

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ToolError::failed(NAME, format!("Failed to read {path}: {e}")))?;

        let text = String::from_utf8(bytes)
            .map_err(|_| ToolError::failed(NAME, format!("{path} is not a text document")))?;

        if text.trim().is_empty() {
            return Ok(format!("{path} is empty."));
        }
        Ok(text)
    }
}
