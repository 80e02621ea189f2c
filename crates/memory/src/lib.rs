//! Collaborator store implementations for Quarry.
//!
//! Reference backends for the similarity cache, the knowledge store, and
//! the conversation store. The SQLite conversation store sits behind the
//! `sqlite` feature.

pub mod file_backend;
pub mod in_memory;
pub mod noop;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::{FileCache, FileConversationStore};
pub use in_memory::{InMemoryCache, InMemoryConversations, InMemoryKnowledge};
pub use noop::{NoopCache, NoopConversations, NoopKnowledge};
pub use vector::TermVector;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConversationStore;
