//! Per-thread checkpoints under `<state_dir>/checkpoints/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::machine::Phase;
use crate::core::state::OrchestrationState;

/// Snapshot of a loop taken after a generation or an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Phase the loop resumes at.
    pub phase: Phase,
    pub state: OrchestrationState,
    /// RFC 3339 timestamp of the save.
    pub updated_at: String,
}

impl Checkpoint {
    pub fn new(phase: Phase, state: &OrchestrationState) -> Self {
        Self {
            thread_id: state.thread_id(),
            phase,
            state: state.clone(),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Checkpoint files keyed by thread id.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("checkpoints"),
        }
    }

    pub fn path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }

    /// Load the checkpoint for `thread_id`, or `None` if there is none.
    pub fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "loading checkpoint");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read checkpoint {}", path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("parse checkpoint {}", path.display()))?;
        debug!(phase = ?checkpoint.phase, attempt = checkpoint.state.attempt, "checkpoint loaded");
        Ok(Some(checkpoint))
    }

    /// Atomically write the checkpoint (temp file + rename).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path(&checkpoint.thread_id);
        debug!(path = %path.display(), phase = ?checkpoint.phase, attempt = checkpoint.state.attempt, "writing checkpoint");
        let mut buf = serde_json::to_string_pretty(checkpoint)?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    /// Remove the checkpoint for `thread_id`. Missing files are fine.
    pub fn clear(&self, thread_id: &str) -> Result<()> {
        let path = self.path(thread_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove checkpoint {}", path.display())),
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("checkpoint path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp checkpoint {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace checkpoint {}", path.display()))?;
    Ok(())
}
