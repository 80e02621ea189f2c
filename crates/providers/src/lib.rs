//! Reasoning-policy providers for Quarry.
//!
//! All providers implement the `quarry_core::Provider` trait.
//! [`router::build_from_config`] assembles the governed providers a run uses.

pub mod governed;
pub mod openai_compat;
pub mod router;

pub use governed::{GovernedProvider, RateLimiter};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderSet, build_from_config};
