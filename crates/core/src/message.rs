//! Message domain types.
//!
//! These are the value objects that flow through a run:
//! the user query enters as a `User` message, the reasoning policy answers
//! with `Assistant` messages (optionally carrying capability requests), and
//! each dispatched capability comes back as a `Tool` observation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key marking where a synthetic message came from.
pub const ORIGIN_KEY: &str = "origin";

/// Origin value of the message the Cache Gate emits on a cache hit.
pub const ORIGIN_CACHE: &str = "cache";

/// Origin value of the message carrying retrieved document context.
pub const ORIGIN_DOCUMENTS: &str = "documents";

/// Origin value of the message summarising earlier turns of the thread.
pub const ORIGIN_HISTORY: &str = "history";

/// Origin value of the convergence warning injected near the step cap.
pub const ORIGIN_BUDGET: &str = "budget";

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The reasoning policy
    Assistant,
    /// Instructions and injected context
    System,
    /// Capability observation
    Tool,
}

/// A single message in a run's context.
///
/// Messages are never edited after creation; a run only appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Capability requests issued by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<CapabilityRequest>,

    /// If this is an observation, which request it answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (origin markers, provider info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            requests: Vec::new(),
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message that asks for capabilities.
    pub fn assistant_with_requests(
        content: impl Into<String>,
        requests: Vec<CapabilityRequest>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.requests = requests;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create an observation answering the request with `correlation_id`.
    pub fn observation(correlation_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.correlation_id = Some(correlation_id.into());
        msg
    }

    /// The assistant message the Cache Gate emits when a prior answer is reused.
    pub fn cache_hit(answer: impl Into<String>) -> Self {
        Self::assistant(answer).with_origin(ORIGIN_CACHE)
    }

    /// Tag this message with an origin marker.
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.metadata
            .insert(ORIGIN_KEY.into(), serde_json::Value::String(origin.into()));
        self
    }

    /// The origin marker, if any.
    pub fn origin(&self) -> Option<&str> {
        self.metadata.get(ORIGIN_KEY).and_then(|v| v.as_str())
    }

    /// Whether this is the Cache Gate's cache-hit sentinel.
    pub fn is_cache_hit(&self) -> bool {
        self.role == Role::Assistant && self.origin() == Some(ORIGIN_CACHE)
    }

    /// Whether the assistant asked for at least one capability.
    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// A copy of this message with its capability requests removed.
    ///
    /// Used when a response is forced terminal, so the persisted history
    /// never contains requests that were not dispatched.
    pub fn without_requests(&self) -> Self {
        let mut msg = self.clone();
        msg.requests.clear();
        msg
    }
}

/// A capability invocation requested by the reasoning policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Correlation ID pairing this request with its observation
    pub id: String,

    /// Name of the capability to invoke
    pub name: String,

    /// Argument mapping, as JSON object text exactly as the policy produced it
    pub arguments: String,
}

impl CapabilityRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the argument text. Empty text counts as an empty mapping.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}
