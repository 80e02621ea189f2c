//! The value handed back to the caller when a run reaches DONE.

use serde::{Deserialize, Serialize};

/// Answer returned when the run ends without any terminal text.
pub const FALLBACK_ANSWER: &str =
    "I apologize, but I couldn't generate a response. Please try again.";

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reasoning policy answered without requesting capabilities
    Answered,
    /// The similarity cache supplied the answer
    CacheHit,
    /// The hard step cap forced the last response to be terminal
    BudgetExhausted,
    /// The reasoning policy kept failing
    PolicyFailure,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::CacheHit => "cache_hit",
            Self::BudgetExhausted => "budget_exhausted",
            Self::PolicyFailure => "policy_failure",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final answer plus everything the run produced on the side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Final answer text (never empty)
    pub answer: String,

    /// Artifact names created during the run (e.g. chart files)
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// REASON steps executed
    pub steps: u32,

    /// Capability requests dispatched
    pub dispatches: usize,

    /// Why the run stopped
    pub termination: Termination,
}

impl RunResult {
    /// Whether the answer came straight from the similarity cache.
    pub fn from_cache(&self) -> bool {
        self.termination == Termination::CacheHit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_serializes_snake_case() {
        let json = serde_json::to_string(&Termination::BudgetExhausted).unwrap();
        assert_eq!(json, "\"budget_exhausted\"");
        assert_eq!(Termination::CacheHit.to_string(), "cache_hit");
    }

    #[test]
    fn from_cache_follows_termination() {
        let result = RunResult {
            answer: "cached".into(),
            artifacts: vec![],
            steps: 0,
            dispatches: 0,
            termination: Termination::CacheHit,
        };
        assert!(result.from_cache());
    }
}
