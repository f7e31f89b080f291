//! Bounded generate → execute → decide loop for `fixloop run`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use harness::ExecutionResult;
use tracing::{info, instrument, warn};

use crate::core::machine::{Event, LoopStop, Phase, decide, next_phase, stop_reason};
use crate::core::state::OrchestrationState;
use crate::io::generator::{ContractError, GenerationRequest, GenerationResponse, Generator};
use crate::io::sandbox::{ExecutionRequest, Sandbox};

/// Characters shown in log previews of code and program output.
const PREVIEW_CHARS: usize = 300;

/// Progress reported to the caller after each step that changes state.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// A generation was accepted; `state.attempt` is its number.
    Generated {
        response: &'a GenerationResponse,
        state: &'a OrchestrationState,
    },
    /// The current candidate was executed.
    Executed {
        result: &'a ExecutionResult,
        state: &'a OrchestrationState,
    },
    /// The loop reached `Done`.
    Finished {
        stop: LoopStop,
        state: &'a OrchestrationState,
    },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub thread_id: String,
    /// Generations performed over the whole thread, including resumed ones.
    pub attempts: u32,
    pub stop: LoopStop,
    pub final_state: OrchestrationState,
}

/// Drive the loop from `start` until it is done.
///
/// Generation errors (including [`ContractError`]) stop the loop immediately
/// and are returned; execution never fails, a failed run feeds the next
/// generation. `on_event` errors are logged and the loop carries on; a run
/// whose progress could not be recorded is still worth finishing.
#[instrument(skip_all, fields(thread_id = %state.thread_id(), max_iters = state.max_iters, start = ?start))]
pub fn run_loop<G, S, F>(
    mut state: OrchestrationState,
    start: Phase,
    generator: &G,
    sandbox: &S,
    timeout: Duration,
    mut on_event: F,
) -> Result<LoopOutcome>
where
    G: Generator + ?Sized,
    S: Sandbox + ?Sized,
    F: FnMut(&LoopEvent<'_>) -> Result<()>,
{
    let thread_id = state.thread_id();
    if start == Phase::Executing && state.code.trim().is_empty() {
        bail!("cannot resume execution without code");
    }

    let mut phase = start;
    loop {
        phase = match phase {
            Phase::Generating => {
                let next_attempt = state.attempt + 1;
                let request = GenerationRequest::from_state(&state);
                let action = if request.code.trim().is_empty() {
                    "generating"
                } else {
                    "repairing"
                };
                info!(attempt = next_attempt, max_iters = state.max_iters, "{action} code");

                let response = generator
                    .generate(&request)
                    .with_context(|| format!("generate attempt {next_attempt}"))?;
                if response.code.trim().is_empty() {
                    return Err(ContractError::EmptyCode.into());
                }
                state.record_generation(response.code.clone());
                info!(attempt = state.attempt, "produced code (preview):\n{}", preview(&state.code));
                report(
                    &mut on_event,
                    &LoopEvent::Generated {
                        response: &response,
                        state: &state,
                    },
                );
                advance(phase, Event::CodeReady)?
            }
            Phase::Executing => {
                info!(attempt = state.attempt, "executing code in sandbox");
                let request = ExecutionRequest::new(state.code.clone()).with_timeout(timeout);
                let result = sandbox.run(&request);
                log_result(&result);
                state.record_result(result.clone());
                report(
                    &mut on_event,
                    &LoopEvent::Executed {
                        result: &result,
                        state: &state,
                    },
                );
                advance(phase, Event::ResultReady)?
            }
            Phase::Deciding => {
                let decision = decide(&state);
                info!(attempt = state.attempt, decision = ?decision, "decided");
                advance(phase, Event::Decided(decision))?
            }
            Phase::Retrying => advance(phase, Event::Regenerate)?,
            Phase::Done => {
                let stop = stop_reason(&state);
                report(
                    &mut on_event,
                    &LoopEvent::Finished {
                        stop,
                        state: &state,
                    },
                );
                info!(attempts = state.attempt, stop = ?stop, "loop finished");
                return Ok(LoopOutcome {
                    thread_id,
                    attempts: state.attempt,
                    stop,
                    final_state: state,
                });
            }
        };
    }
}

fn report<F>(on_event: &mut F, event: &LoopEvent<'_>)
where
    F: FnMut(&LoopEvent<'_>) -> Result<()>,
{
    if let Err(err) = on_event(event) {
        warn!(err = %format!("{err:#}"), "could not record loop progress");
    }
}

fn advance(phase: Phase, event: Event) -> Result<Phase> {
    next_phase(phase, event).ok_or_else(|| anyhow!("invalid transition from {phase:?} on {event:?}"))
}

fn log_result(result: &ExecutionResult) {
    if result.success {
        info!(duration_ms = result.duration_ms, "execution succeeded");
        info!("stdout (preview):\n{}", preview(&result.stdout));
    } else {
        let (kind, message) = result
            .exception
            .as_ref()
            .map(|exc| (exc.kind.as_str(), exc.message.as_str()))
            .unwrap_or(("", ""));
        warn!(exception = kind, message = %preview(message), "execution failed");
        info!("stderr (preview):\n{}", preview(&result.stderr));
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    out.push('…');
    out
}
