//! Shared test helpers for engine component tests.

use async_trait::async_trait;
use quarry_core::error::{ProviderError, ToolError};
use quarry_core::message::{CapabilityRequest, Message};
use quarry_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use quarry_core::tool::{Capability, InvocationContext};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A mock provider that returns a sequence of scripted results.
///
/// Each call to `complete` pops the next result and records the request.
/// Panics if more calls are made than results provided.
pub struct SequentialMockProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub fn scripted(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let call = requests.len();
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("SequentialMockProvider: no response scripted for call #{call}"))
    }
}

/// Create a plain text response (no capability requests).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response carrying capability requests and optional thought text.
pub fn make_request_response(requests: Vec<CapabilityRequest>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_requests(thought, requests),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a capability request with id `call_{name}`.
pub fn make_request(name: &str, args: serde_json::Value) -> CapabilityRequest {
    CapabilityRequest::new(format!("call_{name}"), name, args)
}

/// A capability that returns a fixed text and counts its invocations.
pub struct FixedCapability {
    pub name: &'static str,
    pub output: String,
    pub bulk: bool,
    pub calls: Arc<AtomicUsize>,
}

impl FixedCapability {
    pub fn new(name: &'static str, output: impl Into<String>) -> Self {
        Self {
            name,
            output: output.into(),
            bulk: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    /// Shared invocation counter, readable after the capability is boxed.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Capability for FixedCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn bulk_output(&self) -> bool {
        self.bulk
    }

    async fn invoke(
        &self,
        _arguments: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}
