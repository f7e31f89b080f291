//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output pipes may stay open after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Human-readable exit status, e.g. `0` or `signal`.
    pub fn exit_label(&self) -> String {
        exit_label(self.status)
    }
}

pub fn exit_label(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is fed and stdout/stderr are drained on separate threads while the child runs.
/// `output_limit_bytes` bounds the amount of stdout/stderr stored in memory (bytes beyond
/// this are discarded while still draining the pipe). On timeout the child is killed and
/// `timed_out` is set; that is not an error.
///
/// On unix the child leads its own process group. A timeout kills the whole group, and so
/// does a group member that keeps the output pipes open after the child has exited. Readers
/// still blocked after that are abandoned with whatever they captured.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let pid = child.id();

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            // Dropping the handle at the end of the thread closes the pipe.
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let mut stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let mut stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(pid);
            if let Err(e) = child.kill() {
                // The child may have exited between the timeout and the kill.
                debug!(err = %e, "kill after timeout failed");
            }
            child.wait().context("wait command after kill")?
        }
    };

    if !drain(&mut stdout_reader, &mut stderr_reader)? {
        warn!(pid, "output still open after exit, killing process group");
        kill_process_group(pid);
        if !drain(&mut stdout_reader, &mut stderr_reader)? {
            warn!(pid, "abandoning output readers");
        }
    }

    if let Some(handle) = stdin_handle {
        // A writer blocked on a pipe nobody reads is left behind.
        if handle.is_finished() {
            match handle.join() {
                Ok(Ok(())) => {}
                // A child that exits without reading all of stdin closes the pipe early.
                Ok(Err(e)) => debug!(err = %e, "stdin not fully written"),
                Err(_) => return Err(anyhow!("stdin writer thread panicked")),
            }
        } else {
            debug!("stdin writer still blocked, detaching");
        }
    }

    let (stdout, stdout_truncated) = stdout_reader.take();
    let (stderr, stderr_truncated) = stderr_reader.take();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Wait up to [`DRAIN_GRACE`] for both streams to reach EOF.
fn drain(stdout: &mut StreamReader, stderr: &mut StreamReader) -> Result<bool> {
    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout_done = stdout.wait_until(deadline).context("join stdout")?;
    let stderr_done = stderr.wait_until(deadline).context("join stderr")?;
    Ok(stdout_done && stderr_done)
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!(pid, "process group killed"),
        // Nothing left in the group.
        Ok(status) => debug!(pid, status = %exit_label(status), "process group kill reported failure"),
        Err(e) => warn!(pid, err = %e, "could not run kill"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// A pipe drained on its own thread into a shared buffer.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<Result<()>>,
    finished: bool,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            // The receiver is gone once the reader has been abandoned.
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self {
            captured,
            done,
            finished: false,
        }
    }

    /// Whether the stream reached EOF before `deadline`.
    fn wait_until(&mut self, deadline: Instant) -> Result<bool> {
        if self.finished {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(result) => {
                result?;
                self.finished = true;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
        }
    }

    fn take(self) -> (Vec<u8>, usize) {
        let mut captured = self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (std::mem::take(&mut captured.bytes), captured.truncated)
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Captured>) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdin_echo_and_status() {
        let output = run_command_with_timeout(
            sh("cat; echo err >&2; exit 4"),
            Some(b"hello"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.stderr, b"err\n");
        assert_eq!(output.exit_label(), "4");
        assert!(!output.timed_out);
    }

    #[test]
    fn kills_on_timeout() {
        let output =
            run_command_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(200), 1024)
                .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn truncates_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let result = run_command_with_timeout(
            Command::new("/nonexistent/fixloop-binary"),
            None,
            Duration::from_secs(1),
            1024,
        );
        assert!(result.is_err());
    }

    #[test]
    fn timeout_kills_the_whole_process_group() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & sleep 30"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn lingering_background_job_does_not_block() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("echo done; sleep 30 &"),
            None,
            Duration::from_secs(20),
            1024,
        )
        .expect("run");
        assert!(!output.timed_out);
        assert!(output.status.success());
        assert_eq!(output.stdout, b"done\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
