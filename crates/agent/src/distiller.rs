//! Context distiller: compresses bulk observations before they enter context.
//!
//! Full pages and documents are too large to carry through the loop. The
//! distiller sends them, with the run's query, to a low-temperature
//! instance of the reasoning-policy service and keeps only the extracted
//! facts. It never fails: errors come back as a short diagnostic string.

use quarry_config::DistillerConfig;
use quarry_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, warn};

const DIAGNOSTIC_CHARS: usize = 100;

pub struct Distiller {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_input_chars: usize,
    large_result_chars: usize,
}

impl Distiller {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self::from_config(provider, model, &DistillerConfig::default())
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        config: &DistillerConfig,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: config.temperature,
            max_input_chars: config.max_input_chars,
            large_result_chars: config.large_result_chars,
        }
    }

    pub fn with_large_result_chars(mut self, chars: usize) -> Self {
        self.large_result_chars = chars;
        self
    }

    pub fn with_max_input_chars(mut self, chars: usize) -> Self {
        self.max_input_chars = chars;
        self
    }

    /// Whether a raw result should be distilled.
    ///
    /// Only bulk capabilities qualify, and only above the size criterion.
    pub fn should_distill(&self, bulk: bool, raw: &str) -> bool {
        bulk && raw.chars().count() > self.large_result_chars
    }

    /// Build the extraction prompt for `raw`, truncated to the input limit.
    pub fn prompt(&self, raw: &str, query: &str) -> String {
        let text = truncate_chars(raw, self.max_input_chars);
        format!(
            "Topic: {query}. Extract specific metrics, dates, and core facts from this raw text:\n\n{text}"
        )
    }

    /// Distill `raw` with respect to `query`.
    pub async fn distill(&self, raw: &str, query: &str) -> String {
        let request = ProviderRequest::prompt(&self.model, self.prompt(raw, query), self.temperature);

        match self.provider.complete(request).await {
            Ok(response) if !response.message.content.trim().is_empty() => {
                let distilled = response.message.content;
                debug!(
                    raw_chars = raw.len(),
                    distilled_chars = distilled.len(),
                    "Observation distilled"
                );
                distilled
            }
            Ok(_) => {
                warn!("Distiller returned no content");
                "Context distillation failed: empty response".to_string()
            }
            Err(e) => {
                warn!(error = %e, "Distillation failed");
                let reason = e.to_string();
                format!(
                    "Context distillation failed: {}",
                    truncate_chars(&reason, DIAGNOSTIC_CHARS)
                )
            }
        }
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response};
    use quarry_core::error::ProviderError;

    fn distiller(provider: Arc<SequentialMockProvider>) -> Distiller {
        Distiller::new(provider, "mock-model")
            .with_large_result_chars(10)
            .with_max_input_chars(20)
    }

    #[test]
    fn criterion_needs_bulk_and_size() {
        let d = distiller(Arc::new(SequentialMockProvider::new(vec![])));
        assert!(d.should_distill(true, "this is well over ten"));
        assert!(!d.should_distill(true, "short"));
        assert!(!d.should_distill(true, "exactly10!"));
        assert!(!d.should_distill(false, "this is well over ten"));
    }

    #[test]
    fn prompt_truncates_input() {
        let d = distiller(Arc::new(SequentialMockProvider::new(vec![])));
        let raw = "a".repeat(50);
        let prompt = d.prompt(&raw, "samsung revenue");
        assert!(prompt.starts_with("Topic: samsung revenue. Extract specific metrics"));
        assert!(prompt.ends_with(&"a".repeat(20)));
        assert!(!prompt.contains(&"a".repeat(21)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[tokio::test]
    async fn distill_returns_extracted_facts() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            "Revenue 2023: 259T won",
        )]));
        let d = distiller(provider.clone());
        let out = d.distill(&"x".repeat(100), "revenue").await;
        assert_eq!(out, "Revenue 2023: 259T won");

        let request = &provider.requests()[0];
        assert!(request.capabilities.is_empty());
        assert_eq!(request.temperature, 0.0);
    }

    #[tokio::test]
    async fn failure_yields_short_diagnostic() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::Network("e".repeat(500)),
        )]));
        let out = distiller(provider).distill("raw page", "q").await;
        assert!(out.starts_with("Context distillation failed: "));
        assert!(out.len() <= "Context distillation failed: ".len() + DIAGNOSTIC_CHARS);
    }

    #[tokio::test]
    async fn empty_reply_is_diagnostic_not_empty() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("  ")]));
        let out = distiller(provider).distill("raw page", "q").await;
        assert!(!out.trim().is_empty());
        assert!(out.contains("failed"));
    }
}
