//! Telemetry harness for sandboxed program execution.
//!
//! The harness runs one untrusted program inside the sandbox image and always
//! emits exactly one JSON [`ExecutionResult`] on stdout, however the program
//! ends. The crate is split along the instrumentation seam:
//!
//! - **[`result`]** and **[`locals`]**: the wire data model, shared with the
//!   isolation boundary that parses it on the host side.
//! - **[`recorder`]**: the bounded line-trace ring buffer.
//! - **[`host`]**: the [`ScriptHost`] hook an execution environment implements,
//!   plus result assembly and emission.
//! - **`python`** (feature `python`): the embedded CPython host.

pub mod host;
pub mod locals;
pub mod logging;
#[cfg(feature = "python")]
pub mod python;
pub mod recorder;
pub mod result;

pub use host::{HostRun, ScriptHost, TraceSink, run_program, write_result_line};
pub use locals::{Fallback, LocalValue, Locals, collect_locals};
#[cfg(feature = "python")]
pub use python::PythonHost;
pub use recorder::TraceRecorder;
pub use result::{ExceptionInfo, ExecutionResult, MAX_EVENTS, MAX_LOCALS, MAX_REPR_CHARS, TraceEvent};
