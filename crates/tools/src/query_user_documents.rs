//! Retrieval over the user's stored documents, as a capability.
//!
//! Lets the reasoning policy ask the knowledge store a follow-up question
//! mid-run, scoped to the user the run belongs to.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::memory::KnowledgeStore;
use quarry_core::tool::{Capability, InvocationContext};
use std::sync::Arc;

const NAME: &str = "query_user_documents";

pub struct QueryUserDocuments {
    store: Arc<dyn KnowledgeStore>,
    top_k: usize,
}

impl QueryUserDocuments {
    pub fn new(store: Arc<dyn KnowledgeStore>, top_k: usize) -> Self {
        Self {
            store,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl Capability for QueryUserDocuments {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Search the documents the user has uploaded. Returns the most relevant passages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in the user's documents"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::invalid(NAME, "Missing 'query' argument"))?;

        let snippets = self
            .store
            .retrieve(query, &ctx.user_scope, self.top_k)
            .await
            .map_err(|e| ToolError::failed(NAME, e.to_string()))?;

        if snippets.is_empty() {
            return Ok("No relevant passages found in the user's documents.".into());
        }

        Ok(snippets
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
