//! Reasoning policy adapter.
//!
//! Wraps the reasoning-policy provider: prepends the standing instruction,
//! prunes the history to the context window, and attaches the capability
//! catalog. Rate limiting, retries and per-call timeouts belong to the
//! provider handed in (see `quarry_providers::GovernedProvider`).

use crate::budget::pruned_view;
use quarry_core::error::ProviderError;
use quarry_core::message::Message;
use quarry_core::provider::{CapabilityDefinition, Provider, ProviderRequest};
use std::sync::Arc;
use tracing::debug;

pub const SYSTEM_INSTRUCTION: &str = "You are a strategic researcher. Your objective is to \
answer complex queries autonomously using the available capabilities.

GUIDELINES:
1. DISCOVERY: Use 'web_search' for current facts. When a result looks useful, use \
'scrape_site' to read the page.
2. LOCAL DOCUMENTS: Use 'read_document' when the user names a file, and \
'query_user_documents' to search the documents they have uploaded.
3. DOCUMENT CONTEXT: If the context contains '[FROM YOUR DOCUMENTS]', prioritise that \
information and do not search the web for what it already answers.
4. ANALYSIS: Use 'calculate' for growth rates, ratios and other arithmetic instead of \
computing in your head.
5. OUTPUTS: When asked for a table, chart or report file, write it with 'save_artifact'.
6. TERMINATION: Once the information is gathered, reply with a comprehensive textual \
report and no capability requests. Do not call capabilities for what the context \
already answers.";

pub struct ReasoningPolicy {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    window: usize,
    instruction: String,
    catalog: Vec<CapabilityDefinition>,
}

impl ReasoningPolicy {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        catalog: Vec<CapabilityDefinition>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            window: 5,
            instruction: SYSTEM_INSTRUCTION.to_string(),
            catalog,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Number of history messages sent per call (anchor included).
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn catalog(&self) -> &[CapabilityDefinition] {
        &self.catalog
    }

    /// Build the request for one REASON step.
    pub fn build_request(&self, history: &[Message]) -> ProviderRequest {
        let mut messages = Vec::with_capacity(self.window + 1);
        messages.push(Message::system(&self.instruction));
        messages.extend(pruned_view(history, self.window));

        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            capabilities: self.catalog.clone(),
        }
    }

    /// Run one REASON step over the history.
    pub async fn invoke(&self, history: &[Message]) -> Result<Message, ProviderError> {
        let request = self.build_request(history);
        debug!(
            model = %self.model,
            history = history.len(),
            sent = request.messages.len(),
            "Invoking reasoning policy"
        );
        let response = self.provider.complete(request).await?;
        Ok(response.message)
    }
}
