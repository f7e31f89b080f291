//! Stable exit codes for fixloop CLI commands.

/// The loop produced a passing program, or `exec` ran cleanly.
pub const OK: i32 = 0;
/// Invalid config, generator contract failure, or any other error.
pub const INVALID: i32 = 1;
/// The attempt budget ran out, or the program `exec` ran failed.
pub const FAILED: i32 = 2;
