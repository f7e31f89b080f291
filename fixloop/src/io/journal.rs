//! Persist loop progress: checkpoints for resuming, attempt logs for review.

use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::machine::Phase;
use crate::core::state::{OrchestrationState, thread_id};
use crate::io::attempt_log::AttemptLog;
use crate::io::checkpoint::{Checkpoint, CheckpointStore};
use crate::orchestrate::LoopEvent;

/// Where a run should start.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    pub state: OrchestrationState,
    pub phase: Phase,
    /// True when the state came from a checkpoint.
    pub resumed: bool,
}

/// Checkpoints and attempt logs for one thread.
#[derive(Debug, Clone)]
pub struct Journal {
    thread_id: String,
    checkpoints: CheckpointStore,
    attempts: AttemptLog,
}

impl Journal {
    pub fn new(state_dir: &Path, query: &str) -> Self {
        let thread_id = thread_id(query);
        Self {
            checkpoints: CheckpointStore::new(state_dir),
            attempts: AttemptLog::new(state_dir, thread_id.clone()),
            thread_id,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Pick up a saved run for `query`, or start a new one.
    ///
    /// `fresh` discards any checkpoint. The attempt budget always comes from
    /// `max_iters`, so a resumed thread can be given more attempts.
    pub fn resume_point(&self, query: &str, max_iters: u32, fresh: bool) -> Result<ResumePoint> {
        let new_run = || ResumePoint {
            state: OrchestrationState::new(query, max_iters),
            phase: Phase::Generating,
            resumed: false,
        };
        if fresh {
            self.checkpoints.clear(&self.thread_id)?;
            return Ok(new_run());
        }
        let Some(checkpoint) = self.checkpoints.load(&self.thread_id)? else {
            return Ok(new_run());
        };
        if checkpoint.state.query != query {
            warn!(thread_id = %self.thread_id, "checkpoint belongs to a different query, starting over");
            return Ok(new_run());
        }
        if checkpoint.phase == Phase::Done {
            return Ok(new_run());
        }
        let mut state = checkpoint.state;
        state.max_iters = max_iters;
        info!(
            thread_id = %self.thread_id,
            phase = ?checkpoint.phase,
            attempt = state.attempt,
            "resuming from checkpoint"
        );
        Ok(ResumePoint {
            state,
            phase: checkpoint.phase,
            resumed: true,
        })
    }

    /// Record one loop event. Generations and executions are checkpointed at
    /// the phase that follows them; a finished loop removes its checkpoint.
    pub fn record(&self, event: &LoopEvent<'_>) -> Result<()> {
        match event {
            LoopEvent::Generated { response, state } => {
                self.attempts.write_generation(state.attempt, response)?;
                self.checkpoints
                    .save(&Checkpoint::new(Phase::Executing, state))
            }
            LoopEvent::Executed { result, state } => {
                self.attempts.write_result(state.attempt, result)?;
                self.checkpoints
                    .save(&Checkpoint::new(Phase::Deciding, state))
            }
            LoopEvent::Finished { .. } => self.checkpoints.clear(&self.thread_id),
        }
    }
}
