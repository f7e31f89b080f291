//! Phase transition table and retry decision for the repair loop.

use serde::{Deserialize, Serialize};

use crate::core::state::OrchestrationState;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generating,
    Executing,
    Deciding,
    Retrying,
    Done,
}

/// Inputs that move the loop between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The generator returned usable code.
    CodeReady,
    /// The sandbox returned an execution result.
    ResultReady,
    /// The retry decision was made.
    Decided(Decision),
    /// A retry hands control back to generation.
    Regenerate,
}

/// Outcome of the decision step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    End,
}

/// Why the loop reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStop {
    /// The last execution succeeded.
    Solved,
    /// The attempt budget ran out on a failing program.
    Exhausted,
}

/// Decide whether another generation attempt is warranted.
///
/// Success wins over the budget check, so a program that passes on the final
/// attempt still ends the loop as solved.
pub fn decide(state: &OrchestrationState) -> Decision {
    if state.solved() {
        return Decision::End;
    }
    if state.attempt >= state.max_iters {
        return Decision::End;
    }
    Decision::Retry
}

/// Classify a finished loop.
pub fn stop_reason(state: &OrchestrationState) -> LoopStop {
    if state.solved() {
        LoopStop::Solved
    } else {
        LoopStop::Exhausted
    }
}

/// Apply `event` to `current`. Returns `None` for transitions the loop never makes.
pub fn next_phase(current: Phase, event: Event) -> Option<Phase> {
    match (current, event) {
        (Phase::Generating, Event::CodeReady) => Some(Phase::Executing),
        (Phase::Executing, Event::ResultReady) => Some(Phase::Deciding),
        (Phase::Deciding, Event::Decided(Decision::End)) => Some(Phase::Done),
        (Phase::Deciding, Event::Decided(Decision::Retry)) => Some(Phase::Retrying),
        (Phase::Retrying, Event::Regenerate) => Some(Phase::Generating),
        _ => None,
    }
}
