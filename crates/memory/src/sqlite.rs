//! SQLite conversation store.
//!
//! One table, `thread_messages`, holding each thread's messages as JSON
//! rows ordered by position. A save replaces the thread inside a single
//! transaction, so readers never see a half-written history.

use async_trait::async_trait;
use quarry_core::error::StoreError;
use quarry_core::memory::ConversationStore;
use quarry_core::message::Message;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // A single connection keeps ":memory:" databases coherent.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS thread_messages (
                user_scope  TEXT NOT NULL,
                thread_id   TEXT NOT NULL,
                position    INTEGER NOT NULL,
                body        TEXT NOT NULL,
                PRIMARY KEY (user_scope, thread_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("thread_messages table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, thread_id: &str, user_scope: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM thread_messages WHERE user_scope = ? AND thread_id = ? ORDER BY position",
        )
        .bind(user_scope)
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let body: String = row
                    .try_get("body")
                    .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
                serde_json::from_str(&body).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn save(
        &self,
        thread_id: &str,
        user_scope: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM thread_messages WHERE user_scope = ? AND thread_id = ?")
            .bind(user_scope)
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        for (position, message) in messages.iter().enumerate() {
            let body = serde_json::to_string(message)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query(
                "INSERT INTO thread_messages (user_scope, thread_id, position, body) VALUES (?, ?, ?, ?)",
            )
            .bind(user_scope)
            .bind(thread_id)
            .bind(position as i64)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }
}
