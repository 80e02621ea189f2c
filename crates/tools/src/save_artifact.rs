//! Artifact capability: write generated files (tables, charts, notes) into
//! the artifact directory, where the run picks them up as side outputs.

use crate::path::artifact_file_name;
use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::{Capability, InvocationContext};
use std::path::PathBuf;
use tracing::info;

const NAME: &str = "save_artifact";

pub struct SaveArtifact {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl SaveArtifact {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            extensions: extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    fn allowed_extension(&self, file_name: &str) -> bool {
        std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|a| a.eq_ignore_ascii_case(e)))
    }
}

#[async_trait]
impl Capability for SaveArtifact {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Save a generated file for the user, such as a CSV table, a Markdown report, \
         or an SVG chart. The file is returned alongside the final answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Bare file name with extension, e.g. 'revenue.csv'"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["filename", "content"]
        })
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let requested = arguments["filename"]
            .as_str()
            .ok_or_else(|| ToolError::invalid(NAME, "Missing 'filename' argument"))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::invalid(NAME, "Missing 'content' argument"))?;

        let file_name = artifact_file_name(requested).ok_or_else(|| ToolError::PermissionDenied {
            capability: NAME.into(),
            reason: format!("'{requested}' must be a bare file name"),
        })?;

        if !self.allowed_extension(file_name) {
            return Err(ToolError::invalid(
                NAME,
                format!("extension must be one of: {}", self.extensions.join(", ")),
            ));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ToolError::failed(NAME, format!("Failed to create artifact directory: {e}")))?;

        let path = self.dir.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::failed(NAME, format!("Failed to write {file_name}: {e}")))?;

        info!(artifact = file_name, bytes = content.len(), "Artifact saved");
        Ok(format!("Saved artifact {file_name} ({} bytes)", content.len()))
    }
}
