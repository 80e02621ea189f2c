//! Capability trait and the typed capability registry.
//!
//! Capabilities are what the reasoning policy may ask the engine to do:
//! search the web, fetch a page, read a document, compute, or retrieve from
//! the user's stored documents. Each one is a handler with a uniform
//! `(arguments) -> observation text` contract and a declared argument schema.

use crate::error::ToolError;
use crate::provider::CapabilityDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-run information a capability may need besides its arguments.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Partition key for user-scoped collaborators
    pub user_scope: String,

    /// The run's original query
    pub query: String,
}

impl InvocationContext {
    pub fn new(user_scope: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_scope: user_scope.into(),
            query: query.into(),
        }
    }
}

/// The core Capability trait.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The unique name of this capability (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this capability does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this capability's argument mapping.
    fn parameters_schema(&self) -> Value;

    /// Whether raw results are bulk text (page scrapes, full documents) that
    /// should be distilled before entering context when large.
    fn bulk_output(&self) -> bool {
        false
    }

    /// Invoke the capability and return its observation text.
    async fn invoke(&self, arguments: Value, ctx: &InvocationContext) -> Result<String, ToolError>;

    /// Convert this capability into a catalog entry for the model.
    fn to_definition(&self) -> CapabilityDefinition {
        CapabilityDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A fixed routing table from capability name to handler.
///
/// Built once at engine construction. Lookups by unknown names and
/// arguments that violate the declared schema are dispatch errors.
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Box<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: BTreeMap::new(),
        }
    }

    /// Register a capability. Replaces any existing one with the same name.
    pub fn register(&mut self, capability: Box<dyn Capability>) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, capability);
    }

    /// Get a capability by name.
    pub fn get(&self, name: &str) -> Option<&dyn Capability> {
        self.capabilities.get(name).map(|c| c.as_ref())
    }

    /// The catalog, ordered by name.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        self.capabilities.values().map(|c| c.to_definition()).collect()
    }

    /// Validate the arguments against the schema, then invoke.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        validate_arguments(&capability.parameters_schema(), &arguments)
            .map_err(|reason| ToolError::invalid(name, reason))?;
        capability.invoke(arguments, ctx).await
    }

    /// List all registered capability names, ordered.
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check an argument mapping against an object schema.
///
/// Covers the subset of JSON Schema capability declarations use: the
/// arguments must be an object, every `required` key must be present, and
/// declared properties must match their primitive `type`.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(args) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if args.get(key).is_none_or(|v| v.is_null()) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, value) in args {
        if value.is_null() {
            continue;
        }
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
        else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !ok {
            return Err(format!("argument '{key}' must be of type {expected}"));
        }
    }

    Ok(())
}
