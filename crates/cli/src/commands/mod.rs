pub mod ask;
pub mod config_cmd;
pub mod doctor;
pub mod init;

use anyhow::Context;
use quarry_config::{AppConfig, StorageConfig};
use quarry_core::memory::{ConversationStore, SimilarityCache};
use quarry_memory::{FileCache, FileConversationStore, InMemoryCache, InMemoryConversations};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the config from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(AppConfig::config_path);
    AppConfig::load_with_env(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// The persistent collaborators selected by `[storage]`.
pub struct Stores {
    pub cache: Arc<dyn SimilarityCache>,
    pub conversations: Arc<dyn ConversationStore>,
}

/// Open the cache and conversation store for the configured backend.
///
/// `file` keeps both under one directory; `sqlite` keeps threads in the
/// database and the cache as a JSON-lines file beside it.
pub async fn open_stores(storage: &StorageConfig) -> anyhow::Result<Stores> {
    match storage.backend.as_str() {
        "memory" => Ok(Stores {
            cache: Arc::new(InMemoryCache::new()),
            conversations: Arc::new(InMemoryConversations::new()),
        }),
        "file" => {
            let (cache, threads) = match storage.path.as_deref() {
                Some(root) => {
                    let root = PathBuf::from(root);
                    (root.join("cache.jsonl"), root.join("threads"))
                }
                None => (FileCache::default_path(), FileConversationStore::default_path()),
            };
            Ok(Stores {
                cache: Arc::new(FileCache::new(cache)),
                conversations: Arc::new(FileConversationStore::new(threads)),
            })
        }
        "sqlite" => {
            let db = storage
                .path
                .clone()
                .unwrap_or_else(|| AppConfig::config_dir().join("quarry.db").display().to_string());
            let cache = Path::new(&db).with_extension("cache.jsonl");
            let conversations = quarry_memory::SqliteConversationStore::new(&db)
                .await
                .with_context(|| format!("failed to open sqlite store at {db}"))?;
            Ok(Stores {
                cache: Arc::new(FileCache::new(cache)),
                conversations: Arc::new(conversations),
            })
        }
        other => anyhow::bail!("unknown storage backend '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_opens() {
        let stores = open_stores(&StorageConfig {
            backend: "memory".into(),
            path: None,
        })
        .await
        .unwrap();
        assert_eq!(stores.cache.name(), "in_memory");
    }

    #[tokio::test]
    async fn file_backend_round_trips_threads() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open_stores(&StorageConfig {
            backend: "file".into(),
            path: Some(dir.path().display().to_string()),
        })
        .await
        .unwrap();

        let messages = vec![quarry_core::message::Message::user("hello")];
        stores.conversations.save("t1", "alice", &messages).await.unwrap();
        let loaded = stores.conversations.load("t1", "alice").await.unwrap();
        assert_eq!(loaded[0].content, "hello");
        assert!(dir.path().join("threads").exists());
    }

    #[tokio::test]
    async fn unknown_backend_is_an_error() {
        let result = open_stores(&StorageConfig {
            backend: "mongo".into(),
            path: None,
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn explicit_config_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = \"gpt-4o-mini\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
    }
}
