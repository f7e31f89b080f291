//! Test-only doubles for the generator and the sandbox.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use harness::{ExceptionInfo, ExecutionResult};
use tempfile::TempDir;

use crate::io::generator::{ContractError, GenerationRequest, GenerationResponse, Generator};
use crate::io::sandbox::{ExecutionRequest, Sandbox};

/// Build a response whose only interesting field is `code`.
pub fn response(code: &str) -> GenerationResponse {
    GenerationResponse {
        problem: "problem".to_string(),
        root_cause: "root cause".to_string(),
        fix: "fix".to_string(),
        code: code.to_string(),
    }
}

/// A successful run that printed `stdout`.
pub fn ok_result(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration_ms: 1,
        trace: Vec::new(),
        exception: None,
    }
}

/// A failed run with the given exception.
pub fn failed_result(kind: &str, message: &str) -> ExecutionResult {
    ExecutionResult::failure(ExceptionInfo::new(kind, message), "", format!("{kind}: {message}\n"))
}

/// Fresh scratch directory for checkpoints and attempt logs.
pub fn scratch_state_dir() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

/// Generator that replays scripted responses and records every request.
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<std::result::Result<GenerationResponse, ContractError>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<std::result::Result<GenerationResponse, ContractError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.requests.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(err)) => Err(err.into()),
            None => Err(anyhow!("scripted generator exhausted")),
        }
    }
}

/// Sandbox that replays scripted results and records every request.
pub struct ScriptedSandbox {
    results: RefCell<VecDeque<ExecutionResult>>,
    repeat: Option<ExecutionResult>,
    requests: RefCell<Vec<ExecutionRequest>>,
}

impl ScriptedSandbox {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            repeat: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Return `result` for every run.
    pub fn repeating(result: ExecutionResult) -> Self {
        Self {
            results: RefCell::new(VecDeque::new()),
            repeat: Some(result),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.requests.borrow_mut().push(request.clone());
        if let Some(result) = self.results.borrow_mut().pop_front() {
            return result;
        }
        self.repeat
            .clone()
            .unwrap_or_else(|| failed_result("ScriptError", "scripted sandbox exhausted"))
    }
}
