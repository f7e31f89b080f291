//! Generator abstraction for producing candidate programs.
//!
//! The [`Generator`] trait decouples the repair loop from the actual code
//! source (an external command such as `codex exec`). Tests use scripted
//! generators that return predetermined responses without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::state::{FailureContext, OrchestrationState};
use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::PromptEngine;

/// JSON Schema every generator response must satisfy.
pub const RESPONSE_SCHEMA: &str = include_str!("../../schemas/code_response.schema.json");

/// File name of the schema inside the generator work dir.
const SCHEMA_FILE: &str = "code_response.schema.json";

/// Characters of generator stderr kept in a failure message.
const STDERR_TAIL_CHARS: usize = 2000;

/// What the generator is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub query: String,
    /// Current candidate, empty before the first generation.
    pub code: String,
    pub last_failure: Option<FailureContext>,
}

impl GenerationRequest {
    pub fn from_state(state: &OrchestrationState) -> Self {
        Self {
            query: state.query.clone(),
            code: state.code.clone(),
            last_failure: state.last_failure(),
        }
    }
}

/// A validated generator response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub problem: String,
    pub root_cause: String,
    pub fix: String,
    pub code: String,
}

/// The generator broke its response contract. Always fatal for the loop.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("generator response is not valid JSON: {0}")]
    Malformed(String),
    #[error("generator response violates schema: {0}")]
    Schema(String),
    #[error("generator returned empty code")]
    EmptyCode,
    #[error("generator timed out after {0}s")]
    TimedOut(u64),
    #[error("generator exited with status {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Source of candidate programs.
pub trait Generator {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        (**self).generate(request)
    }
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        (**self).generate(request)
    }
}

/// Compile [`RESPONSE_SCHEMA`].
pub fn response_validator() -> Result<Validator> {
    let schema: Value = serde_json::from_str(RESPONSE_SCHEMA).context("parse response schema")?;
    validator_for(&schema).map_err(|err| anyhow!("invalid response schema: {}", err))
}

/// Parse and validate a raw generator response.
pub fn parse_response(
    validator: &Validator,
    raw: &str,
) -> std::result::Result<GenerationResponse, ContractError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|err| ContractError::Malformed(err.to_string()))?;
    if !validator.is_valid(&value) {
        let messages = validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(ContractError::Schema(messages.join("; ")));
    }
    let response: GenerationResponse =
        serde_json::from_value(value).map_err(|err| ContractError::Malformed(err.to_string()))?;
    if response.code.trim().is_empty() {
        return Err(ContractError::EmptyCode);
    }
    Ok(response)
}

/// Generator that runs an external command, prompt on stdin.
///
/// `{schema}` in the command is replaced with the schema path. `{output}` is
/// replaced with a fresh response file path, which is read after the command
/// exits; without it the response is read from stdout.
pub struct CommandGenerator {
    config: GeneratorConfig,
    work_dir: PathBuf,
    schema_path: PathBuf,
    prompts: PromptEngine,
    validator: Validator,
}

impl CommandGenerator {
    pub fn new(config: GeneratorConfig, work_dir: impl Into<PathBuf>) -> Result<Self> {
        if config.command.is_empty() {
            return Err(anyhow!("generator command is empty"));
        }
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("create generator dir {}", work_dir.display()))?;
        let schema_path = work_dir.join(SCHEMA_FILE);
        fs::write(&schema_path, RESPONSE_SCHEMA)
            .with_context(|| format!("write response schema {}", schema_path.display()))?;
        Ok(Self {
            config,
            work_dir,
            schema_path,
            prompts: PromptEngine::new()?,
            validator: response_validator()?,
        })
    }

    fn command_args(&self, output_path: &Path) -> (Vec<String>, bool) {
        let schema = self.schema_path.display().to_string();
        let output = output_path.display().to_string();
        let mut uses_output = false;
        let args = self
            .config
            .command
            .iter()
            .map(|arg| {
                if arg.contains("{output}") {
                    uses_output = true;
                }
                arg.replace("{schema}", &schema).replace("{output}", &output)
            })
            .collect();
        (args, uses_output)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(timeout_secs = self.config.timeout_secs))]
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let prompt = self.prompts.render(request)?;
        let output_path = self
            .work_dir
            .join(format!("response-{}.json", Uuid::new_v4().simple()));
        let (args, uses_output) = self.command_args(&output_path);
        let Some((program, rest)) = args.split_first() else {
            return Err(anyhow!("generator command is empty"));
        };

        info!(program = %program, repair = !request.code.trim().is_empty(), "requesting code");
        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.work_dir);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run generator command")?;

        if output.timed_out {
            warn!("generator timed out");
            return Err(ContractError::TimedOut(self.config.timeout_secs).into());
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            let stderr = stderr.trim();
            let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
            return Err(ContractError::Failed {
                status: output.exit_label(),
                stderr: stderr.chars().skip(skip).collect(),
            }
            .into());
        }

        let raw = if uses_output {
            let raw = fs::read_to_string(&output_path).map_err(|err| {
                ContractError::Malformed(format!(
                    "missing response file {}: {err}",
                    output_path.display()
                ))
            });
            if let Err(err) = fs::remove_file(&output_path) {
                debug!(err = %err, "response file not removed");
            }
            raw?
        } else {
            output.stdout_lossy()
        };

        let response = parse_response(&self.validator, &raw)?;
        debug!(code_len = response.code.len(), "generator response accepted");
        Ok(response)
    }
}
