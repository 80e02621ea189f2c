//! The Quarry orchestration engine.
//!
//! A run answers one research query:
//!
//! 1. **Gate**: reuse a cached answer for a near-identical query, and pull
//!    in context from the user's documents
//! 2. **Reason**: ask the reasoning policy for the next move over a pruned
//!    view of the history
//! 3. **Act**: dispatch the requested capabilities concurrently, distill
//!    bulk results, and append one observation per request
//! 4. Loop back to 2 until the policy answers or the step cap forces it to
//!
//! The engine owns its collaborators (provider, cache, knowledge store,
//! conversation store) and is shared across concurrent runs; per-run state
//! never leaves the run.

pub mod artifacts;
pub mod budget;
pub mod dispatcher;
pub mod distiller;
pub mod engine;
pub mod gate;
pub mod policy;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use artifacts::{ArtifactSnapshot, ArtifactTracker};
pub use budget::{StepBudget, pruned_view};
pub use dispatcher::{Dispatched, Dispatcher};
pub use distiller::Distiller;
pub use engine::Engine;
pub use gate::{CacheGate, GateOutcome};
pub use policy::{ReasoningPolicy, SYSTEM_INSTRUCTION};
pub use tokio_util::sync::CancellationToken;
