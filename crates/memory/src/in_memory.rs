//! In-memory stores: useful for testing and ephemeral sessions.

use crate::vector::{rank, TermVector};
use async_trait::async_trait;
use quarry_core::error::StoreError;
use quarry_core::memory::{CacheMatch, ConversationStore, KnowledgeStore, SimilarityCache};
use quarry_core::message::Message;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One cached query/answer pair.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) text: String,
    pub(crate) answer: String,
    pub(crate) vector: TermVector,
}

/// Per-scope cache entries, shared with the file-backed cache.
#[derive(Debug, Default)]
pub(crate) struct CacheIndex {
    scopes: HashMap<String, Vec<CacheEntry>>,
}

impl CacheIndex {
    pub(crate) fn query(&self, text: &str, user_scope: &str, top_k: usize) -> Vec<CacheMatch> {
        let Some(entries) = self.scopes.get(user_scope) else {
            return Vec::new();
        };
        let query = TermVector::from_text(text);
        rank(&query, entries.iter().map(|e| &e.vector), top_k)
            .into_iter()
            .map(|(i, score)| CacheMatch {
                score,
                answer: entries[i].answer.clone(),
            })
            .collect()
    }

    /// Insert, or replace the answer if the same text is already cached.
    pub(crate) fn upsert(&mut self, text: &str, answer: &str, user_scope: &str) {
        let entries = self.scopes.entry(user_scope.to_string()).or_default();
        match entries.iter_mut().find(|e| e.text == text) {
            Some(existing) => existing.answer = answer.to_string(),
            None => entries.push(CacheEntry {
                text: text.to_string(),
                answer: answer.to_string(),
                vector: TermVector::from_text(text),
            }),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.scopes
            .iter()
            .flat_map(|(scope, entries)| entries.iter().map(move |e| (scope.as_str(), e)))
    }

    pub(crate) fn len(&self) -> usize {
        self.scopes.values().map(Vec::len).sum()
    }
}

/// A similarity cache held in process memory.
pub struct InMemoryCache {
    index: Arc<RwLock<CacheIndex>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            index: Arc::new(RwLock::new(CacheIndex::default())),
        }
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityCache for InMemoryCache {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn query(
        &self,
        text: &str,
        user_scope: &str,
        top_k: usize,
    ) -> Result<Vec<CacheMatch>, StoreError> {
        Ok(self.index.read().await.query(text, user_scope, top_k))
    }

    async fn upsert(&self, text: &str, answer: &str, user_scope: &str) -> Result<(), StoreError> {
        self.index.write().await.upsert(text, answer, user_scope);
        Ok(())
    }
}

struct Chunk {
    text: String,
    vector: TermVector,
}

/// Maximum characters per stored document chunk.
const CHUNK_CHARS: usize = 800;

/// Split a document into paragraph-aligned chunks of at most `max_chars`.
///
/// A single paragraph longer than the limit is split on char boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !current.is_empty() && current.chars().count() + para.chars().count() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if para.chars().count() > max_chars {
            let chars: Vec<char> = para.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// A knowledge store over documents added at runtime.
pub struct InMemoryKnowledge {
    scopes: Arc<RwLock<HashMap<String, Vec<Chunk>>>>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self {
            scopes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Chunk and index a document for `user_scope`. Returns the chunk count.
    pub async fn add_document(&self, user_scope: &str, text: &str) -> usize {
        let chunks: Vec<Chunk> = chunk_text(text, CHUNK_CHARS)
            .into_iter()
            .map(|text| Chunk {
                vector: TermVector::from_text(&text),
                text,
            })
            .collect();
        let count = chunks.len();
        self.scopes
            .write()
            .await
            .entry(user_scope.to_string())
            .or_default()
            .extend(chunks);
        count
    }

    /// Index every `.txt` and `.md` file directly inside `dir`.
    pub async fn ingest_dir(&self, user_scope: &str, dir: &Path) -> Result<usize, StoreError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;

        let mut total = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
        {
            let path = entry.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "txt" | "md"));
            if !is_text {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => total += self.add_document(user_scope, &text).await,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document"),
            }
        }

        debug!(dir = %dir.display(), chunks = total, "Documents ingested");
        Ok(total)
    }
}

impl Default for InMemoryKnowledge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledge {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn retrieve(
        &self,
        text: &str,
        user_scope: &str,
        top_k: usize,
    ) -> Result<Vec<String>, StoreError> {
        let scopes = self.scopes.read().await;
        let Some(chunks) = scopes.get(user_scope) else {
            return Ok(Vec::new());
        };
        let query = TermVector::from_text(text);
        Ok(rank(&query, chunks.iter().map(|c| &c.vector), top_k)
            .into_iter()
            .map(|(i, _)| chunks[i].text.clone())
            .collect())
    }
}

/// Conversation history held in process memory.
pub struct InMemoryConversations {
    threads: Arc<RwLock<HashMap<(String, String), Vec<Message>>>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self {
            threads: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, thread_id: &str, user_scope: &str) -> Result<Vec<Message>, StoreError> {
        let key = (user_scope.to_string(), thread_id.to_string());
        Ok(self.threads.read().await.get(&key).cloned().unwrap_or_default())
    }

    async fn save(
        &self,
        thread_id: &str,
        user_scope: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let key = (user_scope.to_string(), thread_id.to_string());
        self.threads.write().await.insert(key, messages.to_vec());
        Ok(())
    }
}
