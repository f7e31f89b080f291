//! Execution host seam and result assembly.
//!
//! A [`ScriptHost`] is the instrumentation hook of a concrete execution
//! environment: it runs the program, reports each observed line of the
//! program to a [`TraceSink`], and hands back captured output plus the
//! exception, if any. Everything around it (timing, trace bounding, result
//! shape, emission) is host-independent and lives here.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::recorder::TraceRecorder;
use crate::result::{ExceptionInfo, ExecutionResult, MAX_EVENTS, TraceEvent};

/// What a host reports back after running one program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostRun {
    pub stdout: String,
    pub stderr: String,
    /// Set when the program raised; `None` means a clean return.
    pub exception: Option<ExceptionInfo>,
}

/// Shared handle to the run's [`TraceRecorder`].
///
/// Hosts whose trace callback must be `Send + 'static` can clone it into the
/// callback freely.
#[derive(Debug, Clone)]
pub struct TraceSink(Arc<Mutex<TraceRecorder>>);

impl TraceSink {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(TraceRecorder::new(capacity))))
    }

    pub fn record(&self, event: TraceEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event);
    }

    /// Take the recorded events and the eviction count.
    ///
    /// The sink stops recording afterwards; late events from a host that
    /// failed to detach its observer are discarded.
    pub fn take_events(&self) -> (Vec<TraceEvent>, usize) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let recorder = std::mem::replace(&mut *guard, TraceRecorder::new(0));
        let dropped = recorder.dropped();
        (recorder.into_events(), dropped)
    }
}

/// Instrumentation hook of an execution environment.
pub trait ScriptHost {
    /// Run `program` as the sole top-level unit in a fresh context.
    ///
    /// Must not panic or return early on program failure: every error the
    /// program raises, including exit requests, becomes `HostRun::exception`.
    /// The line observer must be removed before the exception is inspected.
    fn execute(&mut self, program: &str, sink: TraceSink) -> HostRun;
}

/// Execute `program` on `host` and assemble the structured result.
#[instrument(skip_all, fields(program_bytes = program.len()))]
pub fn run_program<H: ScriptHost>(host: &mut H, program: &str) -> ExecutionResult {
    let sink = TraceSink::new(MAX_EVENTS);

    let start = Instant::now();
    let run = host.execute(program, sink.clone());
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (trace, dropped) = sink.take_events();
    debug!(
        duration_ms,
        events = trace.len(),
        dropped,
        raised = run.exception.is_some(),
        "program finished"
    );

    ExecutionResult {
        success: run.exception.is_none(),
        stdout: run.stdout,
        stderr: run.stderr,
        duration_ms,
        trace,
        exception: run.exception,
    }
}

/// Write `result` as exactly one line of JSON.
///
/// If the full result cannot be encoded, a minimal failure document carrying
/// the captured output is written instead, so the line is always present.
pub fn write_result_line<W: Write>(mut writer: W, result: &ExecutionResult) -> std::io::Result<()> {
    let line = match serde_json::to_string(result) {
        Ok(line) => line,
        Err(err) => {
            warn!(err = %err, "result encoding failed, emitting minimal result");
            minimal_result_line(result, &err.to_string())
        }
    };
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn minimal_result_line(result: &ExecutionResult, reason: &str) -> String {
    json!({
        "success": false,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "duration_ms": result.duration_ms,
        "trace": [],
        "exception": {
            "type": "SerializationError",
            "message": format!("could not encode execution result: {reason}"),
            "frames": [],
        },
    })
    .to_string()
}
