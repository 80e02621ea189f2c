//! Cache gate: the first state of every run.
//!
//! Asks the similarity cache for a prior answer and the knowledge store
//! for document context, both scoped to the run's user. Both lookups are
//! best-effort; failures are reported back as degradations and the run
//! proceeds as if nothing was found.

use quarry_core::memory::{CacheMatch, KnowledgeStore, SimilarityCache};
use quarry_core::message::{Message, ORIGIN_DOCUMENTS};
use quarry_memory::{NoopCache, NoopKnowledge};
use std::sync::Arc;
use tracing::debug;

/// Marker the reasoning policy is told to look for.
pub const DOCUMENTS_MARKER: &str = "[FROM YOUR DOCUMENTS]";

/// What the gate found for one query.
#[derive(Debug, Default)]
pub struct GateOutcome {
    /// Cache-hit sentinel and its similarity score
    pub hit: Option<(f32, Message)>,

    /// System message carrying retrieved document context
    pub documents: Option<Message>,

    /// Collaborators that failed, with their error text
    pub degraded: Vec<(String, String)>,
}

impl GateOutcome {
    pub fn is_hit(&self) -> bool {
        self.hit.as_ref().is_some_and(|(_, m)| m.is_cache_hit())
    }
}

pub struct CacheGate {
    cache: Arc<dyn SimilarityCache>,
    knowledge: Arc<dyn KnowledgeStore>,
    threshold: f32,
    top_k: usize,
}

impl CacheGate {
    pub fn new(threshold: f32, top_k: usize) -> Self {
        Self {
            cache: Arc::new(NoopCache),
            knowledge: Arc::new(NoopKnowledge),
            threshold,
            top_k,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn SimilarityCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn cache(&self) -> &Arc<dyn SimilarityCache> {
        &self.cache
    }

    /// Run both lookups concurrently.
    pub async fn check(&self, query: &str, user_scope: &str) -> GateOutcome {
        let (cached, retrieved) = tokio::join!(
            self.cache.query(query, user_scope, 1),
            self.knowledge.retrieve(query, user_scope, self.top_k),
        );

        let mut outcome = GateOutcome::default();

        match cached {
            Ok(matches) => {
                outcome.hit = self.usable(matches).map(|m| (m.score, Message::cache_hit(m.answer)));
            }
            Err(e) => outcome
                .degraded
                .push((self.cache.name().to_string(), e.to_string())),
        }

        match retrieved {
            Ok(snippets) => outcome.documents = documents_message(&snippets),
            Err(e) => outcome
                .degraded
                .push((self.knowledge.name().to_string(), e.to_string())),
        }

        debug!(
            hit = outcome.hit.is_some(),
            documents = outcome.documents.is_some(),
            degraded = outcome.degraded.len(),
            "Cache gate checked"
        );
        outcome
    }

    fn usable(&self, matches: Vec<CacheMatch>) -> Option<CacheMatch> {
        matches
            .into_iter()
            .next()
            .filter(|m| m.score >= self.threshold && !m.answer.trim().is_empty())
    }
}

/// Render retrieved snippets as a single system message, or nothing.
fn documents_message(snippets: &[String]) -> Option<Message> {
    let context = snippets
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    if context.is_empty() {
        return None;
    }

    Some(
        Message::system(format!(
            "{DOCUMENTS_MARKER}\nRelevant context from the user's uploaded documents:\n\n\
             {context}\n\nIMPORTANT: Prioritise this context over external search. If it \
             answers the query, answer from it directly without searching the web."
        ))
        .with_origin(ORIGIN_DOCUMENTS),
    )
}
