//! Isolation boundary against real child processes, using `sh` stand-ins for
//! the harness.
#![cfg(unix)]

use std::time::Duration;

use fixloop::io::sandbox::{CONTAINER_ERROR, ExecutionRequest, LocalSandbox, Sandbox};
use harness::ExecutionResult;

const OK_LINE: &str =
    r#"{"success":true,"stdout":"hi\n","stderr":"","duration_ms":2,"trace":[{"file":"<string>","line":1,"func":"<module>","locals":{}}]}"#;

fn shell(script: &str) -> LocalSandbox {
    LocalSandbox::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

fn request(code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code).with_timeout(Duration::from_secs(10))
}

fn exception(result: &ExecutionResult) -> (&str, &str) {
    let exc = result.exception.as_ref().expect("exception");
    (exc.kind.as_str(), exc.message.as_str())
}

#[test]
fn harness_line_is_returned_verbatim() {
    let sandbox = shell(&format!("cat >/dev/null; printf '%s\\n' '{OK_LINE}'"));
    let result = sandbox.run(&request("print('hi')"));
    assert!(result.success);
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.trace.len(), 1);
    assert_eq!(result.trace[0].line, 1);
}

#[test]
fn program_arrives_on_stdin() {
    let script = format!(
        r#"code=$(cat); if [ "$code" = "print(42)" ]; then printf '%s' '{OK_LINE}'; else echo "got: $code"; fi"#
    );
    let result = shell(&script).run(&request("print(42)"));
    assert!(result.success, "unexpected result: {result:?}");
}

#[test]
fn garbage_output_is_degraded() {
    let result = shell("cat >/dev/null; echo 'Traceback: boom'; echo oops >&2; exit 3")
        .run(&request("print(1)"));
    assert!(!result.success);
    assert_eq!(result.duration_ms, 0);
    assert!(result.trace.is_empty());
    assert_eq!(result.stdout, "Traceback: boom\n");
    assert_eq!(result.stderr, "oops\n");
    assert_eq!(
        exception(&result),
        (CONTAINER_ERROR, "invalid harness output (exit 3)")
    );
}

#[test]
fn silent_harness_is_degraded() {
    let result = shell("cat >/dev/null").run(&request("print(1)"));
    assert_eq!(
        exception(&result),
        (CONTAINER_ERROR, "invalid harness output (exit 0)")
    );
}

#[test]
fn timeout_is_enforced_by_the_boundary() {
    let sandbox = shell("exec sleep 5");
    let started = std::time::Instant::now();
    let result =
        sandbox.run(&ExecutionRequest::new("while True: pass").with_timeout(Duration::from_millis(300)));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!result.success);
    let (kind, message) = exception(&result);
    assert_eq!(kind, CONTAINER_ERROR);
    assert!(message.starts_with("sandbox timed out after"), "{message}");
}

#[test]
fn missing_harness_is_degraded() {
    let sandbox = LocalSandbox::new(vec!["/nonexistent/fixloop-harness".to_string()]);
    let result = sandbox.run(&request("print(1)"));
    assert!(!result.success);
    let (kind, message) = exception(&result);
    assert_eq!(kind, CONTAINER_ERROR);
    assert!(message.contains("could not be started"), "{message}");
}

#[test]
fn oversized_output_is_degraded() {
    let sandbox = shell(&format!("cat >/dev/null; printf '%s' '{OK_LINE}'")).with_output_limit(16);
    let result = sandbox.run(&request("print(1)"));
    assert!(!result.success);
    assert!(exception(&result).1.starts_with("harness output exceeded limit"));
}

#[test]
fn repeated_runs_are_independent() {
    let sandbox = shell(&format!("cat >/dev/null; printf '%s' '{OK_LINE}'"));
    let first = sandbox.run(&request("print('hi')"));
    let second = sandbox.run(&request("print('hi')"));
    assert_eq!(first, second);
}

#[test]
fn timeout_reaches_background_processes() {
    let sandbox = shell("cat >/dev/null; sleep 30 & sleep 60");
    let started = std::time::Instant::now();
    let result = sandbox
        .run(&ExecutionRequest::new("import subprocess").with_timeout(Duration::from_secs(1)));
    assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
    let (kind, message) = exception(&result);
    assert_eq!(kind, CONTAINER_ERROR);
    assert!(message.starts_with("sandbox timed out after 1s"), "{message}");
}

#[test]
fn detached_child_holding_stdout_does_not_stall() {
    let sandbox = shell(&format!("cat >/dev/null; printf '%s\\n' '{OK_LINE}'; sleep 30 &"));
    let started = std::time::Instant::now();
    let result = sandbox.run(&request("print('hi')"));
    assert!(started.elapsed() < Duration::from_secs(8), "{:?}", started.elapsed());
    assert!(result.success, "unexpected result: {result:?}");
}
