//! Isolation boundary: run one candidate program in a disposable sandbox.
//!
//! Every call is request-scoped. The boundary owns the wall-clock timeout and
//! never returns an error: anything that goes wrong outside the program itself
//! (container failed to start, harness printed garbage, timeout) is folded into
//! a failed [`ExecutionResult`] with exception type [`CONTAINER_ERROR`].

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use harness::{ExceptionInfo, ExecutionResult};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::io::config::SandboxConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Default wall-clock limit for one execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(420);

/// Exception type used for failures of the boundary itself.
pub const CONTAINER_ERROR: &str = "ContainerExecutionError";

/// Default cap on harness stdout/stderr kept in memory.
const DEFAULT_OUTPUT_LIMIT: usize = 32 * 1024 * 1024;

/// One program to execute.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs programs in isolation and reports exactly one result per call.
pub trait Sandbox {
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult;
}

impl<S: Sandbox + ?Sized> Sandbox for &S {
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        (**self).run(request)
    }
}

impl<S: Sandbox + ?Sized> Sandbox for Box<S> {
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        (**self).run(request)
    }
}

/// Fresh container per execution, destroyed afterwards.
#[derive(Debug, Clone)]
pub struct ContainerSandbox {
    config: SandboxConfig,
}

impl ContainerSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Arguments for `<runtime> run`, image last.
    pub fn run_args(&self, name: &str) -> Vec<String> {
        let cfg = &self.config;
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            cfg.network.clone(),
            "--read-only".to_string(),
            "--tmpfs".to_string(),
            "/tmp".to_string(),
            "--memory".to_string(),
            cfg.memory.clone(),
            "--cpus".to_string(),
            cfg.cpus.clone(),
            "--pids-limit".to_string(),
            cfg.pids_limit.to_string(),
            cfg.image.clone(),
        ]
    }

    fn kill_container(&self, name: &str) {
        let mut cmd = Command::new(&self.config.runtime);
        cmd.arg("kill").arg(name);
        match run_command_with_timeout(cmd, None, Duration::from_secs(30), 64 * 1024) {
            Ok(output) if output.status.success() => debug!(container = name, "container killed"),
            // `--rm` may already have removed it.
            Ok(output) => debug!(
                container = name,
                exit = %output.exit_label(),
                stderr = %output.stderr_lossy().trim(),
                "container kill reported failure"
            ),
            Err(err) => warn!(container = name, err = %err, "could not issue container kill"),
        }
    }
}

impl Sandbox for ContainerSandbox {
    #[instrument(skip_all, fields(image = %self.config.image, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        if request.code.trim().is_empty() {
            return empty_program_result();
        }
        let name = format!("fixloop-{}", Uuid::new_v4().simple());
        let mut cmd = Command::new(&self.config.runtime);
        cmd.args(self.run_args(&name));

        info!(container = %name, "launching sandbox");
        let output = run_command_with_timeout(
            cmd,
            Some(request.code.as_bytes()),
            request.timeout,
            self.config.output_limit_bytes,
        );
        // Killing the client does not stop the container.
        if output.as_ref().is_ok_and(|out| out.timed_out) {
            self.kill_container(&name);
        }
        fold_output(output, request.timeout)
    }
}

/// Runs a harness command directly on the host. No isolation.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl LocalSandbox {
    /// `command[0]` is the program, the rest are its arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT,
        }
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }
}

impl Sandbox for LocalSandbox {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        if request.code.trim().is_empty() {
            return empty_program_result();
        }
        let Some((program, args)) = self.command.split_first() else {
            return boundary_failure("", "", "sandbox could not be started: empty harness command (exit none)");
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(request.code.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        );
        fold_output(output, request.timeout)
    }
}

/// Turn raw harness process output into an [`ExecutionResult`].
///
/// The happy path requires trimmed stdout to be exactly one JSON document whose
/// `exception` presence matches `success`. Everything else is degraded.
pub fn fold_output(output: Result<CommandOutput>, timeout: Duration) -> ExecutionResult {
    let output = match output {
        Ok(output) => output,
        Err(err) => {
            warn!(err = %err, "sandbox could not be started");
            return boundary_failure(
                "",
                "",
                format!("sandbox could not be started: {err:#} (exit none)"),
            );
        }
    };

    let stdout = output.stdout_lossy();
    let stderr = output.stderr_lossy();
    let exit = output.exit_label();

    if output.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "sandbox timed out");
        return boundary_failure(
            stdout,
            stderr,
            format!("sandbox timed out after {}s (exit {exit})", timeout.as_secs()),
        );
    }
    if output.stdout_truncated > 0 {
        return boundary_failure(
            stdout,
            stderr,
            format!(
                "harness output exceeded limit, {} bytes dropped (exit {exit})",
                output.stdout_truncated
            ),
        );
    }

    let trimmed = stdout.trim();
    if !trimmed.is_empty() {
        match serde_json::from_str::<ExecutionResult>(trimmed) {
            Ok(result) if result.is_consistent() => {
                debug!(success = result.success, duration_ms = result.duration_ms, "parsed harness result");
                return result;
            }
            Ok(_) => warn!("harness result has inconsistent success/exception"),
            Err(err) => debug!(err = %err, "harness stdout is not a result document"),
        }
    }
    boundary_failure(
        stdout,
        stderr,
        format!("invalid harness output (exit {exit})"),
    )
}

fn empty_program_result() -> ExecutionResult {
    boundary_failure("", "", "empty program, nothing to execute (exit none)")
}

fn boundary_failure(
    stdout: impl Into<String>,
    stderr: impl Into<String>,
    message: impl Into<String>,
) -> ExecutionResult {
    ExecutionResult::failure(ExceptionInfo::new(CONTAINER_ERROR, message), stdout, stderr)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(stdout: &str, code: i32, timed_out: bool) -> CommandOutput {
        CommandOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: b"diag".to_vec(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            timed_out,
        }
    }

    fn message(result: &ExecutionResult) -> &str {
        result.exception_message().expect("exception")
    }

    #[test]
    fn parses_single_result_document() {
        let line = r#"{"success":true,"stdout":"hi\n","stderr":"","duration_ms":3,"trace":[]}"#;
        let result = fold_output(Ok(output(&format!("{line}\n"), 0, false)), DEFAULT_TIMEOUT);
        assert!(result.success);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.duration_ms, 3);
    }

    #[test]
    fn garbage_is_degraded_with_exit_status() {
        let result = fold_output(Ok(output("not json", 3, false)), DEFAULT_TIMEOUT);
        assert!(!result.success);
        assert_eq!(result.stdout, "not json");
        assert_eq!(result.stderr, "diag");
        assert_eq!(result.duration_ms, 0);
        assert!(result.trace.is_empty());
        let exception = result.exception.as_ref().expect("exception");
        assert_eq!(exception.kind, CONTAINER_ERROR);
        assert_eq!(exception.message, "invalid harness output (exit 3)");
    }

    #[test]
    fn two_documents_are_not_one() {
        let line = r#"{"success":true,"stdout":"","stderr":"","duration_ms":0,"trace":[]}"#;
        let result = fold_output(Ok(output(&format!("{line}\n{line}\n"), 0, false)), DEFAULT_TIMEOUT);
        assert!(!result.success);
        assert!(message(&result).starts_with("invalid harness output"));
    }

    #[test]
    fn inconsistent_document_is_degraded() {
        let line = r#"{"success":true,"stdout":"","stderr":"","duration_ms":0,"trace":[],"exception":{"type":"E","message":"m","frames":[]}}"#;
        let result = fold_output(Ok(output(line, 0, false)), DEFAULT_TIMEOUT);
        assert!(!result.success);
        assert_eq!(result.exception.as_ref().map(|e| e.kind.as_str()), Some(CONTAINER_ERROR));
    }

    #[test]
    fn empty_stdout_is_degraded() {
        let result = fold_output(Ok(output("  \n", 125, false)), DEFAULT_TIMEOUT);
        assert_eq!(message(&result), "invalid harness output (exit 125)");
    }

    #[test]
    fn timeout_wins_even_with_output() {
        let line = r#"{"success":true,"stdout":"","stderr":"","duration_ms":0,"trace":[]}"#;
        let mut out = output(line, 0, true);
        out.status = ExitStatus::from_raw(9);
        let result = fold_output(Ok(out), Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(message(&result), "sandbox timed out after 5s (exit signal)");
    }

    #[test]
    fn truncated_stdout_is_degraded() {
        let mut out = output("{\"success\":", 0, false);
        out.stdout_truncated = 10;
        let result = fold_output(Ok(out), DEFAULT_TIMEOUT);
        assert!(message(&result).starts_with("harness output exceeded limit"));
    }

    #[test]
    fn spawn_failure_is_degraded() {
        let result = fold_output(Err(anyhow::anyhow!("no such file")), DEFAULT_TIMEOUT);
        assert!(!result.success);
        assert!(result.stdout.is_empty());
        let msg = message(&result);
        assert!(msg.contains("could not be started"));
        assert!(msg.ends_with("(exit none)"));
    }

    #[test]
    fn container_args_are_locked_down() {
        let sandbox = ContainerSandbox::new(SandboxConfig::default());
        let args = sandbox.run_args("fixloop-test");
        let joined = args.join(" ");
        assert!(joined.starts_with("run --rm -i --name fixloop-test"));
        assert!(joined.contains("--network none"));
        assert!(joined.contains("--read-only"));
        assert!(joined.contains("--pids-limit 256"));
        assert_eq!(args.last().map(String::as_str), Some("fixloop-sandbox:py313"));
    }

    #[test]
    fn empty_program_never_launches() {
        let sandbox = LocalSandbox::new(vec!["/nonexistent/harness".to_string()]);
        let result = sandbox.run(&ExecutionRequest::new("   \n"));
        assert!(!result.success);
        assert!(message(&result).starts_with("empty program"));
    }
}
