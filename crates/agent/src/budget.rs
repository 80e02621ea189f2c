//! Step budget and context pruning.
//!
//! Two independent limits bound a run. The step budget counts REASON
//! executions: past the soft threshold a convergence warning is injected,
//! and at the hard cap the next reasoning response is forced terminal. The
//! context window bounds what each REASON call sees, independent of how
//! long the full history grows.

use quarry_config::EngineConfig;
use quarry_core::message::{Message, ORIGIN_BUDGET};

/// Counts REASON steps against the soft threshold and the hard cap.
#[derive(Debug, Clone)]
pub struct StepBudget {
    soft_threshold: u32,
    hard_cap: u32,
    steps: u32,
}

impl StepBudget {
    pub fn new(soft_threshold: u32, hard_cap: u32) -> Self {
        Self {
            soft_threshold,
            hard_cap: hard_cap.max(1),
            steps: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.soft_step_threshold, config.hard_step_cap)
    }

    /// REASON steps taken so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn hard_cap(&self) -> u32 {
        self.hard_cap
    }

    /// Steps left before the cap forces termination.
    pub fn remaining(&self) -> u32 {
        self.hard_cap.saturating_sub(self.steps)
    }

    /// Whether the next REASON call should be preceded by a warning.
    pub fn needs_warning(&self) -> bool {
        self.steps > self.soft_threshold
    }

    /// Count one REASON execution and return the new step number.
    pub fn record_step(&mut self) -> u32 {
        self.steps = self.steps.saturating_add(1).min(self.hard_cap);
        self.steps
    }

    /// Whether the step just taken was the last one allowed.
    pub fn exhausted(&self) -> bool {
        self.steps >= self.hard_cap
    }

    /// The system message instructing the policy to converge.
    pub fn warning(&self) -> Message {
        let left = self.remaining();
        let noun = if left == 1 { "step" } else { "steps" };
        Message::system(format!(
            "URGENT: You have only {left} {noun} left. STOP researching immediately. \
             Use the information you already have to provide the best possible final answer."
        ))
        .with_origin(ORIGIN_BUDGET)
    }
}

/// Build the view of `history` the reasoning policy sees.
///
/// Histories longer than `window` keep message 0 (the query) plus the most
/// recent `window - 1` messages. The history itself is left untouched.
pub fn pruned_view(history: &[Message], window: usize) -> Vec<Message> {
    let window = window.max(2);
    if history.len() <= window {
        return history.to_vec();
    }
    let tail = &history[history.len() - (window - 1)..];
    std::iter::once(&history[0])
        .chain(tail)
        .cloned()
        .collect()
}
