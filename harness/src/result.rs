//! Wire types for a single sandboxed run.
//!
//! These are produced by the harness inside the sandbox and parsed verbatim by
//! the isolation boundary, so field names are part of the protocol.

use serde::{Deserialize, Serialize};

use crate::locals::Locals;

/// Maximum number of trace events kept per result (oldest dropped first).
pub const MAX_EVENTS: usize = 200;
/// Maximum number of locals captured per trace event or exception frame.
pub const MAX_LOCALS: usize = 30;
/// Maximum length, in characters, of a fallback `repr`.
pub const MAX_REPR_CHARS: usize = 256;

/// One executed source line of the supplied program, or one exception frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// Name of the enclosing routine (`<module>` at top level).
    pub func: String,
    #[serde(default)]
    pub locals: Locals,
}

/// Structured description of the error that ended a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error category, e.g. `ZeroDivisionError`.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// Outermost call first, point of failure last.
    #[serde(default)]
    pub frames: Vec<TraceEvent>,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }
}

/// The single structured output of one sandboxed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock execution time measured by the harness, floored to ms.
    pub duration_ms: u64,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
}

impl ExecutionResult {
    /// A failed result with no trace and zero duration.
    pub fn failure(
        exception: ExceptionInfo,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration_ms: 0,
            trace: Vec::new(),
            exception: Some(exception),
        }
    }

    /// A run carries an exception exactly when it failed.
    pub fn is_consistent(&self) -> bool {
        self.success == self.exception.is_none()
    }

    pub fn exception_message(&self) -> Option<&str> {
        self.exception.as_ref().map(|exc| exc.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locals::LocalValue;
    use serde_json::json;

    #[test]
    fn exception_is_omitted_on_success() {
        let result = ExecutionResult {
            success: true,
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            duration_ms: 3,
            trace: Vec::new(),
            exception: None,
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            json!({
                "success": true,
                "stdout": "hi\n",
                "stderr": "",
                "duration_ms": 3,
                "trace": [],
            })
        );
    }

    #[test]
    fn parses_harness_output_with_fallback_locals() {
        let raw = r#"{
            "success": false,
            "stdout": "",
            "stderr": "",
            "duration_ms": 1,
            "trace": [],
            "exception": {
                "type": "ZeroDivisionError",
                "message": "division by zero",
                "frames": [{
                    "file": "<string>",
                    "line": 3,
                    "func": "<module>",
                    "locals": {
                        "a": 1,
                        "obj": {"repr": "<Foo object at 0x1>", "type_name": "Foo"}
                    }
                }]
            }
        }"#;
        let result: ExecutionResult = serde_json::from_str(raw).expect("parse");
        let exception = result.exception.expect("exception");
        assert_eq!(exception.kind, "ZeroDivisionError");
        let frame = exception.frames.last().expect("frame");
        assert_eq!(frame.line, 3);
        assert_eq!(frame.locals.get("a"), Some(&LocalValue::Native(json!(1))));
        assert!(matches!(
            frame.locals.get("obj"),
            Some(LocalValue::Fallback(fallback)) if fallback.type_name == "Foo"
        ));
    }

    #[test]
    fn exception_presence_must_match_success() {
        let mut result = ExecutionResult::failure(ExceptionInfo::new("E", "boom"), "", "");
        assert!(result.is_consistent());
        result.success = true;
        assert!(!result.is_consistent());
        result.exception = None;
        assert!(result.is_consistent());
        result.success = false;
        assert!(!result.is_consistent());
    }
}
