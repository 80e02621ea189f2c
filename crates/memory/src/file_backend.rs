//! File-based stores: persistent JSON storage under `~/.quarry/`.
//!
//! - [`FileConversationStore`] keeps one JSON file per thread:
//!   `{root}/{user}/{thread}.json`, each component a readable prefix plus
//!   the SHA-256 of the raw id
//! - [`FileCache`] keeps the similarity cache as JSON lines, one
//!   `{scope, text, answer}` object per line, and rewrites the file on
//!   every upsert.

use crate::in_memory::CacheIndex;
use async_trait::async_trait;
use quarry_core::error::StoreError;
use quarry_core::memory::{CacheMatch, ConversationStore, SimilarityCache};
use quarry_core::message::Message;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Longest readable prefix kept in a path component.
const READABLE_PREFIX_CHARS: usize = 40;

/// Map an identifier to a single path component, one-to-one.
///
/// The readable prefix is for humans browsing the directory; the SHA-256
/// of the raw identifier is what keeps distinct ids in distinct files.
fn path_component(id: &str) -> String {
    let prefix: String = id
        .chars()
        .take(READABLE_PREFIX_CHARS)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    format!("{prefix}.{digest}")
}

/// Write `content` to `path` via a sibling temp file and rename.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to replace {}: {e}", path.display())))?;
    Ok(())
}

/// Thread histories as one JSON array per file.
pub struct FileConversationStore {
    root: PathBuf,
}

impl FileConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `~/.quarry/threads`
    pub fn default_path() -> PathBuf {
        home_dir().join(".quarry").join("threads")
    }

    fn thread_path(&self, thread_id: &str, user_scope: &str) -> PathBuf {
        self.root
            .join(path_component(user_scope))
            .join(format!("{}.json", path_component(thread_id)))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, thread_id: &str, user_scope: &str) -> Result<Vec<Message>, StoreError> {
        let path = self.thread_path(thread_id, user_scope);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))
    }

    async fn save(
        &self,
        thread_id: &str,
        user_scope: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let path = self.thread_path(thread_id, user_scope);
        let body = serde_json::to_vec_pretty(messages)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(&path, &body).await?;
        debug!(path = %path.display(), messages = messages.len(), "Thread saved");
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct CacheLine {
    scope: String,
    text: String,
    answer: String,
}

/// A similarity cache persisted as JSON lines.
///
/// Entries are loaded on creation and the whole file is rewritten on every
/// upsert. Term vectors are rebuilt from the text on load.
pub struct FileCache {
    path: PathBuf,
    index: Arc<RwLock<CacheIndex>>,
    /// Orders file rewrites; queries never wait on it.
    write_lock: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let index = Self::load_from_disk(&path);
        debug!(path = %path.display(), entries = index.len(), "File cache loaded");
        Self {
            path,
            index: Arc::new(RwLock::new(index)),
            write_lock: Mutex::new(()),
        }
    }

    /// Default path: `~/.quarry/cache.jsonl`
    pub fn default_path() -> PathBuf {
        home_dir().join(".quarry").join("cache.jsonl")
    }

    fn load_from_disk(path: &Path) -> CacheIndex {
        let mut index = CacheIndex::default();
        let Ok(content) = std::fs::read_to_string(path) else {
            return index;
        };
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<CacheLine>(line) {
                Ok(entry) => index.upsert(&entry.text, &entry.answer, &entry.scope),
                Err(e) => warn!(error = %e, "Skipping corrupted cache line"),
            }
        }
        index
    }

    fn serialize(index: &CacheIndex) -> Result<String, StoreError> {
        let mut content = String::new();
        for (scope, entry) in index.iter() {
            let line = serde_json::to_string(&CacheLine {
                scope: scope.to_string(),
                text: entry.text.clone(),
                answer: entry.answer.clone(),
            })
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }
        Ok(content)
    }
}

#[async_trait]
impl SimilarityCache for FileCache {
    fn name(&self) -> &str {
        "file"
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
        let _writing = self.write_lock.lock().await;
        let content = {
            let mut index = self.index.write().await;
            index.upsert(text, answer, user_scope);
            Self::serialize(&index)?
        };
        write_atomic(&self.path, content.as_bytes()).await
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn thread_roundtrip_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path());

        let messages = vec![Message::user("compare revenue"), Message::assistant("done")];
        store.save("thread-1", "alice", &messages).await.unwrap();

        let reopened = FileConversationStore::new(dir.path());
        let loaded = reopened.load("thread-1", "alice").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "compare revenue");
        assert_eq!(loaded[1].content, "done");
    }

    #[tokio::test]
    async fn unknown_thread_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path());
        assert!(store.load("missing", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupted_thread_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path());
        let path = store.thread_path("t", "u");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let err = store.load("t", "u").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn identifiers_cannot_escape_root() {
        let store = FileConversationStore::new("/data");
        let path = store.thread_path("../../etc/passwd", "../root");
        assert!(path.starts_with("/data"));
        assert!(!path.to_string_lossy().contains(".."));
    }

    #[tokio::test]
    async fn look_alike_scopes_get_separate_threads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path());

        store
            .save("t1", "alice.smith", &[Message::user("alice secret")])
            .await
            .unwrap();
        store.save("t1", "a@x.com", &[Message::user("mail secret")]).await.unwrap();

        assert!(store.load("t1", "alice_smith").await.unwrap().is_empty());
        assert!(store.load("t1", "a_x_com").await.unwrap().is_empty());
        assert!(store.load("t.1", "alice.smith").await.unwrap().is_empty());
        assert_eq!(store.load("t1", "alice.smith").await.unwrap()[0].content, "alice secret");
    }

    #[test]
    fn path_components_are_distinct_and_flat() {
        let ids = ["alice.smith", "alice_smith", "a@x.com", "a_x_com", "", "_", "..", "a/b"];
        let components: std::collections::HashSet<String> =
            ids.iter().map(|id| path_component(id)).collect();
        assert_eq!(components.len(), ids.len());
        for component in &components {
            assert!(!component.contains('/'));
            assert_ne!(component, "..");
        }
    }

    #[tokio::test]
    async fn queries_do_not_wait_for_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache.jsonl"));
        cache.upsert("samsung revenue 2023", "259T won", "alice").await.unwrap();

        let _rewriting = cache.write_lock.lock().await;
        let hits = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            cache.query("samsung revenue 2023", "alice", 1),
        )
        .await
        .expect("query blocked behind the file rewrite")
        .unwrap();
        assert_eq!(hits[0].answer, "259T won");
    }

    #[tokio::test]
    async fn concurrent_upserts_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let cache = FileCache::new(&path);

        let (a, b, c) = tokio::join!(
            cache.upsert("first question", "answer one", "u"),
            cache.upsert("second topic", "answer two", "u"),
            cache.upsert("third subject", "answer three", "u"),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let reopened = FileCache::new(&path);
        assert_eq!(reopened.query("first question", "u", 1).await.unwrap()[0].answer, "answer one");
        assert_eq!(reopened.query("second topic", "u", 1).await.unwrap()[0].answer, "answer two");
        assert_eq!(reopened.query("third subject", "u", 1).await.unwrap()[0].answer, "answer three");
    }

    #[tokio::test]
    async fn cache_persists_across_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp);

        let cache = FileCache::new(&path);
        cache.upsert("samsung revenue 2023", "259T won", "alice").await.unwrap();

        let reopened = FileCache::new(&path);
        let hits = reopened.query("samsung revenue 2023", "alice", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].answer, "259T won");
        assert!(reopened.query("samsung revenue 2023", "bob", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_skips_corrupted_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"scope":"u","text":"first question","answer":"a1"}}"#).unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(tmp, r#"{{"scope":"u","text":"second question","answer":"a2"}}"#).unwrap();

        let cache = FileCache::new(tmp.path());
        let hits = cache.query("second question", "u", 1).await.unwrap();
        assert_eq!(hits[0].answer, "a2");
    }
}
