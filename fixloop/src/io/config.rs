//! Loop configuration stored in `fixloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::state::DEFAULT_MAX_ITERS;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "fixloop.toml";

/// Loop configuration (TOML).
///
/// Missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixloopConfig {
    /// Maximum number of generation attempts per query.
    pub max_iters: u32,

    /// Directory for checkpoints, attempt logs and generator scratch files.
    pub state_dir: PathBuf,

    pub sandbox: SandboxConfig,

    pub generator: GeneratorConfig,
}

/// How candidate programs are isolated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container CLI used to launch and kill sandboxes.
    pub runtime: String,
    /// Pre-built image whose entrypoint is the telemetry harness.
    pub image: String,
    /// Wall-clock limit for one execution, enforced from the host side.
    pub timeout_secs: u64,
    /// Harness output beyond this many bytes per stream is discarded.
    pub output_limit_bytes: usize,
    /// Value for `--network`.
    pub network: String,
    /// Value for `--memory`.
    pub memory: String,
    /// Value for `--cpus`.
    pub cpus: String,
    /// Value for `--pids-limit`.
    pub pids_limit: u32,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External command that turns a prompt into a code response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command and arguments. `{schema}` and `{output}` are replaced with the
    /// response schema path and the response file path. Without `{output}`
    /// the response is read from stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FixloopConfig {
    fn default() -> Self {
        Self {
            max_iters: DEFAULT_MAX_ITERS,
            state_dir: PathBuf::from(".fixloop"),
            sandbox: SandboxConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "fixloop-sandbox:py313".to_string(),
            timeout_secs: 420,
            output_limit_bytes: 32 * 1024 * 1024,
            network: "none".to_string(),
            memory: "1g".to_string(),
            cpus: "1".to_string(),
            pids_limit: 256,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl FixloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iters == 0 {
            return Err(anyhow!("max_iters must be > 0"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.runtime.trim().is_empty() {
            return Err(anyhow!("sandbox.runtime must be non-empty"));
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(anyhow!("sandbox.image must be non-empty"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixloopConfig> {
    if !path.exists() {
        let cfg = FixloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
