//! # Quarry Core
//!
//! Domain types, collaborator traits, and error definitions for the Quarry
//! research agent. This crate has **no framework dependencies**: it defines
//! the model that the engine, providers, stores, and capabilities implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator the orchestration loop talks to is a trait
//! here (reasoning policy service, capabilities, similarity cache, knowledge
//! retrieval, conversation store). Implementations live in their own crates
//! and are injected into the engine at construction, so tests can swap in
//! scripted stand-ins.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod retry;
pub mod run;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{CacheMatch, ConversationStore, KnowledgeStore, SimilarityCache};
pub use message::{CapabilityRequest, Message, Role};
pub use provider::{CapabilityDefinition, Provider, ProviderRequest, ProviderResponse};
pub use retry::RetryPolicy;
pub use run::{RunResult, Termination};
pub use tool::{Capability, CapabilityRegistry, InvocationContext};
