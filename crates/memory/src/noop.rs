//! No-op stores: disable a collaborator entirely.

use async_trait::async_trait;
use quarry_core::error::StoreError;
use quarry_core::memory::{CacheMatch, ConversationStore, KnowledgeStore, SimilarityCache};
use quarry_core::message::Message;

/// A cache that never hits and stores nothing.
pub struct NoopCache;

#[async_trait]
impl SimilarityCache for NoopCache {
    fn name(&self) -> &str {
        "none"
    }

    async fn query(&self, _text: &str, _scope: &str, _top_k: usize) -> Result<Vec<CacheMatch>, StoreError> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _text: &str, _answer: &str, _scope: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A knowledge store with no documents.
pub struct NoopKnowledge;

#[async_trait]
impl KnowledgeStore for NoopKnowledge {
    fn name(&self) -> &str {
        "none"
    }

    async fn retrieve(&self, _text: &str, _scope: &str, _top_k: usize) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

/// A conversation store that forgets everything.
pub struct NoopConversations;

#[async_trait]
impl ConversationStore for NoopConversations {
    fn name(&self) -> &str {
        "none"
    }

    async fn load(&self, _thread_id: &str, _scope: &str) -> Result<Vec<Message>, StoreError> {
        Ok(Vec::new())
    }

    async fn save(&self, _thread_id: &str, _scope: &str, _messages: &[Message]) -> Result<(), StoreError> {
        Ok(())
    }
}
