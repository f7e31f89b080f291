//! The mutable record threaded through the loop.

use harness::ExecutionResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Attempt budget used when none is configured.
pub const DEFAULT_MAX_ITERS: u32 = 3;

/// Hex characters kept from the query digest for a thread id.
const THREAD_ID_LEN: usize = 12;

/// Stable identifier for a query: the first 12 hex chars of its SHA-256.
pub fn thread_id(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(THREAD_ID_LEN);
    id
}

/// Loop state for one query.
///
/// `query` and `max_iters` are fixed at creation; `code`, `attempt` and
/// `last_result` only change through [`OrchestrationState::record_generation`]
/// and [`OrchestrationState::record_result`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub query: String,
    /// Latest candidate program (empty before the first generation).
    pub code: String,
    /// Number of successful generations so far.
    pub attempt: u32,
    pub max_iters: u32,
    pub last_result: Option<ExecutionResult>,
}

impl OrchestrationState {
    pub fn new(query: impl Into<String>, max_iters: u32) -> Self {
        Self {
            query: query.into(),
            code: String::new(),
            attempt: 0,
            max_iters,
            last_result: None,
        }
    }

    pub fn thread_id(&self) -> String {
        thread_id(&self.query)
    }

    /// Accept freshly generated code as the current candidate.
    pub fn record_generation(&mut self, code: String) {
        self.code = code;
        self.attempt += 1;
    }

    pub fn record_result(&mut self, result: ExecutionResult) {
        self.last_result = Some(result);
    }

    pub fn solved(&self) -> bool {
        self.last_result.as_ref().is_some_and(|result| result.success)
    }

    /// Failure details to hand the next generation, if the last run failed.
    pub fn last_failure(&self) -> Option<FailureContext> {
        self.last_result
            .as_ref()
            .filter(|result| !result.success)
            .map(FailureContext::from_result)
    }
}

/// What the generator sees of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    pub stdout: String,
    pub stderr: String,
    pub exception_message: Option<String>,
}

impl FailureContext {
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exception_message: result.exception_message().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::ExceptionInfo;

    #[test]
    fn thread_id_is_short_stable_hex() {
        let id = thread_id("print the first ten primes");
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, thread_id("print the first ten primes"));
        assert_ne!(id, thread_id("print the first ten squares"));
    }

    #[test]
    fn thread_id_matches_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
        assert_eq!(thread_id("abc"), "ba7816bf8f01");
    }

    #[test]
    fn generation_overwrites_code_and_counts_attempts() {
        let mut state = OrchestrationState::new("q", DEFAULT_MAX_ITERS);
        assert_eq!(state.attempt, 0);
        state.record_generation("print(1)".to_string());
        state.record_generation("print(2)".to_string());
        assert_eq!(state.attempt, 2);
        assert_eq!(state.code, "print(2)");
    }

    #[test]
    fn last_failure_only_for_failed_runs() {
        let mut state = OrchestrationState::new("q", DEFAULT_MAX_ITERS);
        assert!(state.last_failure().is_none());

        state.record_result(ExecutionResult::failure(
            ExceptionInfo::new("ZeroDivisionError", "division by zero"),
            "partial",
            "trace",
        ));
        let failure = state.last_failure().expect("failure");
        assert_eq!(failure.stdout, "partial");
        assert_eq!(failure.stderr, "trace");
        assert_eq!(failure.exception_message.as_deref(), Some("division by zero"));

        let mut ok = ExecutionResult::failure(ExceptionInfo::new("E", "m"), "", "");
        ok.success = true;
        ok.exception = None;
        state.record_result(ok);
        assert!(state.solved());
        assert!(state.last_failure().is_none());
    }
}
