//! Attempt logging helpers for `<state_dir>/attempts/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harness::ExecutionResult;
use serde::Serialize;

use crate::io::generator::GenerationResponse;

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub response_path: PathBuf,
    pub result_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(state_dir: &Path, thread_id: &str, attempt: u32) -> Self {
        let dir = state_dir
            .join("attempts")
            .join(thread_id)
            .join(attempt.to_string());
        Self {
            dir: dir.clone(),
            program_path: dir.join("program.py"),
            response_path: dir.join("response.json"),
            result_path: dir.join("result.json"),
        }
    }
}

/// Writes the artifacts of each attempt of one thread.
#[derive(Debug, Clone)]
pub struct AttemptLog {
    state_dir: PathBuf,
    thread_id: String,
}

impl AttemptLog {
    pub fn new(state_dir: &Path, thread_id: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            thread_id: thread_id.into(),
        }
    }

    pub fn paths(&self, attempt: u32) -> AttemptPaths {
        AttemptPaths::new(&self.state_dir, &self.thread_id, attempt)
    }

    /// Record the generator response and the program it produced.
    pub fn write_generation(&self, attempt: u32, response: &GenerationResponse) -> Result<AttemptPaths> {
        let paths = self.paths(attempt);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
        write_text(&paths.program_path, &response.code)?;
        write_json(&paths.response_path, response)?;
        Ok(paths)
    }

    pub fn write_result(&self, attempt: u32, result: &ExecutionResult) -> Result<AttemptPaths> {
        let paths = self.paths(attempt);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
        write_json(&paths.result_path, result)?;
        Ok(paths)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
