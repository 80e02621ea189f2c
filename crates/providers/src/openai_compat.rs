//! OpenAI-compatible chat-completions provider.
//!
//! Works with Gemini's OpenAI endpoint, OpenAI, OpenRouter, Ollama, vLLM,
//! and anything else exposing `/chat/completions` with function calling.

use async_trait::async_trait;
use quarry_core::error::ProviderError;
use quarry_core::message::{CapabilityRequest, Message, Role};
use quarry_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// An OpenAI-compatible reasoning-policy backend.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

/// Build the HTTP client used for completions.
///
/// A client that cannot be built (TLS backend, bad header) means the
/// provider is not usable at all.
pub(crate) fn build_client(
    user_agent: &str,
    timeout: std::time::Duration,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))
}

const USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = build_client(USER_AGENT, std::time::Duration::from_secs(120))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Gemini through its OpenAI-compatible surface.
    pub fn gemini(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            api_key,
        )
    }

    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Convert our messages to the wire format.
    ///
    /// Pruning can drop the assistant message that issued a request while
    /// keeping its observation. The API rejects a `tool` message without a
    /// matching call, so such orphans are sent as user text instead.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        let mut issued: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(messages.len());

        for m in messages {
            let api = match m.role {
                Role::Assistant => {
                    issued.extend(m.requests.iter().map(|r| r.id.as_str()));
                    ApiMessage {
                        role: "assistant".into(),
                        content: Some(m.content.clone()),
                        tool_calls: (!m.requests.is_empty())
                            .then(|| m.requests.iter().map(ApiToolCall::from).collect()),
                        tool_call_id: None,
                    }
                }
                Role::Tool => match m.correlation_id.as_deref() {
                    Some(id) if issued.contains(id) => ApiMessage {
                        role: "tool".into(),
                        content: Some(m.content.clone()),
                        tool_calls: None,
                        tool_call_id: Some(id.to_string()),
                    },
                    _ => ApiMessage::text("user", format!("Observation: {}", m.content)),
                },
                Role::User => ApiMessage::text("user", m.content.clone()),
                Role::System => ApiMessage::text("system", m.content.clone()),
            };
            out.push(api);
        }

        out
    }

    fn to_api_tools(capabilities: &[CapabilityDefinition]) -> Vec<ApiToolDefinition> {
        capabilities
            .iter()
            .map(|c| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    parameters: c.parameters.clone(),
                },
            })
            .collect()
    }

    fn from_api_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let requests: Vec<CapabilityRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| CapabilityRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message::assistant_with_requests(
            choice.message.content.unwrap_or_default(),
            requests,
        );

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl quarry_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.capabilities.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.capabilities));
        }

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        Self::from_api_response(api_response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.into(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

impl From<&CapabilityRequest> for ApiToolCall {
    fn from(req: &CapabilityRequest) -> Self {
        Self {
            id: req.id.clone(),
            r#type: "function".into(),
            function: ApiFunction {
                name: req.name.clone(),
                arguments: req.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
