//! Bounded generate → execute → repair loop for untrusted programs.
//!
//! A generator proposes a program, a disposable sandbox runs it under the
//! telemetry harness, and the loop either stops or feeds the failure back for
//! another attempt. The crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (state record, transition table,
//!   retry decision). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (containers, child processes,
//!   generator command, checkpoints, attempt logs, config).
//!
//! [`orchestrate`] drives the state machine by combining the two.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
