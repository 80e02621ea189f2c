//! Collaborator traits for everything the engine remembers.
//!
//! Three stores sit behind the orchestration loop, all partitioned per user:
//! - [`SimilarityCache`]: near-duplicate query → prior answer
//! - [`KnowledgeStore`]: retrieval over the user's stored documents
//! - [`ConversationStore`]: persisted per-thread message history
//!
//! The engine treats every failure from these as "no result" and keeps going.

use crate::error::StoreError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The best prior answer the cache found for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMatch {
    /// Similarity in `[0, 1]`
    pub score: f32,

    /// The stored answer text
    pub answer: String,
}

/// Near-duplicate answer cache.
///
/// Implementations: in-memory (term vectors), no-op.
#[async_trait]
pub trait SimilarityCache: Send + Sync {
    /// The backend name (e.g., "in_memory", "none").
    fn name(&self) -> &str;

    /// Return up to `top_k` best matches for `text` within `user_scope`,
    /// best first. Callers apply their own threshold.
    async fn query(
        &self,
        text: &str,
        user_scope: &str,
        top_k: usize,
    ) -> Result<Vec<CacheMatch>, StoreError>;

    /// Store (or replace) the answer for `text` within `user_scope`.
    async fn upsert(&self, text: &str, answer: &str, user_scope: &str) -> Result<(), StoreError>;
}

/// Retrieval over the user's stored documents.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    fn name(&self) -> &str;

    /// Return up to `top_k` context snippets relevant to `text`, most
    /// relevant first. May be empty.
    async fn retrieve(
        &self,
        text: &str,
        user_scope: &str,
        top_k: usize,
    ) -> Result<Vec<String>, StoreError>;
}

/// Persisted per-thread conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    fn name(&self) -> &str;

    /// Load the thread's messages in order. Unknown threads are empty.
    async fn load(&self, thread_id: &str, user_scope: &str) -> Result<Vec<Message>, StoreError>;

    /// Replace the thread's messages.
    async fn save(
        &self,
        thread_id: &str,
        user_scope: &str,
        messages: &[Message],
    ) -> Result<(), StoreError>;
}
