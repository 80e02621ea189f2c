//! Provider trait: the abstraction over the reasoning-policy service.
//!
//! A Provider knows how to send an ordered context to a text-generation
//! backend and get back an assistant message, which either carries a final
//! answer or one or more capability requests.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-2.5-flash-lite", "gpt-4o-mini")
    pub model: String,

    /// The ordered context
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Capability catalog the model may request from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<CapabilityDefinition>,
}

impl ProviderRequest {
    /// A single-prompt request with no catalog (used for distillation).
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            temperature,
            max_tokens: None,
            capabilities: Vec::new(),
        }
    }
}

/// A capability catalog entry sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    /// The capability name
    pub name: String,

    /// Natural-language description
    pub description: String,

    /// JSON Schema describing the argument mapping
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The engine never knows which backend is behind it; retries, rate limiting,
/// and timeouts are layered on by wrapping one provider in another.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_request_has_single_user_message() {
        let req = ProviderRequest::prompt("m", "Extract facts", 0.0);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content, "Extract facts");
        assert!(req.capabilities.is_empty());
        assert!(req.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn capability_definition_serialization() {
        let def = CapabilityDefinition {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query" }
                },
                "required": ["query"]
            }),
        };
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("web_search"));
        assert!(json.contains("query"));
    }
}
