//! Embedded CPython execution host.
//!
//! The program is compiled under [`PROGRAM_FILENAME`] and executed in a fresh
//! `__main__` namespace. Line events come from a `sys.settrace` observer
//! implemented as a Rust closure; it only hands out a local tracer for frames
//! of the program itself, so library code is never traced.

use std::sync::{Arc, Mutex, PoisonError};

use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyCFunction, PyDict, PyFloat, PyList, PyLong, PyModule, PyString, PyTuple,
};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::host::{HostRun, ScriptHost, TraceSink};
use crate::locals::{LocalValue, Locals, collect_locals};
use crate::result::{ExceptionInfo, TraceEvent};

/// Filename the supplied program is compiled under.
pub const PROGRAM_FILENAME: &str = "<string>";

/// Containers nested deeper than this are captured as a `repr` fallback.
const MAX_NESTING: usize = 32;

/// Values with more nodes than this (containers, items and keys) are
/// captured as a `repr` fallback. Every retained event owns a copy.
const MAX_NATIVE_NODES: usize = 1000;

/// Strings longer than this many characters are captured as a fallback.
const MAX_NATIVE_STR_CHARS: usize = 4096;

/// `sys.stdout`/`sys.stderr` are interpreter-wide and the GIL is released
/// during `exec`, so runs in one process must not overlap.
static EXECUTION_LOCK: Mutex<()> = Mutex::new(());

/// Runs programs on the interpreter embedded in this process.
#[derive(Debug, Default)]
pub struct PythonHost;

impl ScriptHost for PythonHost {
    fn execute(&mut self, program: &str, sink: TraceSink) -> HostRun {
        let _guard = EXECUTION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        Python::with_gil(|py| match execute_program(py, program, sink) {
            Ok(run) => run,
            Err(err) => {
                warn!(err = %err, "python host setup failed");
                HostRun {
                    exception: Some(exception_info(py, &err)),
                    ..HostRun::default()
                }
            }
        })
    }
}

fn execute_program(py: Python<'_>, program: &str, sink: TraceSink) -> PyResult<HostRun> {
    let sys = py.import_bound("sys")?;
    let io = py.import_bound("io")?;
    let builtins = py.import_bound("builtins")?;

    let stdout_buf = io.call_method0("StringIO")?;
    let stderr_buf = io.call_method0("StringIO")?;
    let saved_stdout = sys.getattr("stdout")?;
    let saved_stderr = sys.getattr("stderr")?;

    let globals = PyDict::new_bound(py);
    globals.set_item("__name__", "__main__")?;
    globals.set_item("__builtins__", &builtins)?;

    let tracer = LineTracer::new(py, sink)?;

    // Raw writes to fd 1, from `os.write` or child processes, would corrupt
    // the result line. They go to stderr until the run is over.
    let _fd_guard = StdoutFdGuard::redirect(py)?;
    sys.setattr("stdout", &stdout_buf)?;
    sys.setattr("stderr", &stderr_buf)?;
    sys.call_method1("settrace", (tracer.function(py),))?;

    let outcome = builtins
        .call_method1("compile", (program, PROGRAM_FILENAME, "exec"))
        .and_then(|code| builtins.call_method1("exec", (code, &globals)));

    // Detach the observer before anything inspects the failure.
    sys.call_method1("settrace", (py.None(),))?;
    tracer.release();
    sys.setattr("stdout", saved_stdout)?;
    sys.setattr("stderr", saved_stderr)?;

    let exception = outcome.err().map(|err| exception_info(py, &err));
    debug!(raised = exception.is_some(), "python program returned");

    Ok(HostRun {
        stdout: buffer_contents(&stdout_buf),
        stderr: buffer_contents(&stderr_buf),
        exception,
    })
}

/// Points fd 1 at fd 2 and restores it on drop.
struct StdoutFdGuard<'py> {
    os: Bound<'py, PyModule>,
    saved: i32,
}

impl<'py> StdoutFdGuard<'py> {
    fn redirect(py: Python<'py>) -> PyResult<Self> {
        let os = py.import_bound("os")?;
        let saved: i32 = os.call_method1("dup", (1,))?.extract()?;
        if let Err(err) = os.call_method1("dup2", (2, 1)) {
            let _ = os.call_method1("close", (saved,));
            return Err(err);
        }
        Ok(Self { os, saved })
    }
}

impl Drop for StdoutFdGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.os.call_method1("dup2", (self.saved, 1)) {
            warn!(err = %err, "could not restore stdout descriptor");
        }
        let _ = self.os.call_method1("close", (self.saved,));
    }
}

/// `sys.settrace` callback that records line events of program frames.
struct LineTracer {
    function: Py<PyCFunction>,
    // The callback returns itself as the local tracer, so it needs a handle
    // to its own function object. Cleared by `release` to break the cycle.
    this: Arc<Mutex<Option<PyObject>>>,
}

impl LineTracer {
    fn new(py: Python<'_>, sink: TraceSink) -> PyResult<Self> {
        let this: Arc<Mutex<Option<PyObject>>> = Arc::new(Mutex::new(None));
        let handle = Arc::clone(&this);

        let function = PyCFunction::new_closure_bound(
            py,
            None,
            None,
            move |args: &Bound<'_, PyTuple>,
                  _kwargs: Option<&Bound<'_, PyDict>>|
                  -> PyResult<PyObject> {
                let py = args.py();
                let frame = args.get_item(0)?;
                if !is_program_frame(&frame) {
                    return Ok(py.None());
                }
                let event: String = args.get_item(1)?.extract()?;
                if event == "line" {
                    // Errors raised here would surface inside the program.
                    match line_event(&frame) {
                        Ok(event) => sink.record(event),
                        Err(err) => debug!(err = %err, "skipping unreadable frame"),
                    }
                }
                let this = handle.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(this
                    .as_ref()
                    .map_or_else(|| py.None(), |function| function.clone_ref(py)))
            },
        )?;

        *this.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(function.clone().into_any().unbind());

        Ok(Self {
            function: function.unbind(),
            this,
        })
    }

    fn function<'py>(&self, py: Python<'py>) -> &Bound<'py, PyCFunction> {
        self.function.bind(py)
    }

    fn release(self) {
        self.this
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn is_program_frame(frame: &Bound<'_, PyAny>) -> bool {
    frame
        .getattr("f_code")
        .and_then(|code| code.getattr("co_filename"))
        .and_then(|name| name.extract::<String>())
        .is_ok_and(|name| name == PROGRAM_FILENAME)
}

fn line_event(frame: &Bound<'_, PyAny>) -> PyResult<TraceEvent> {
    let line = frame.getattr("f_lineno")?.extract::<Option<u32>>()?;
    frame_event(frame, line.unwrap_or(0))
}

fn frame_event(frame: &Bound<'_, PyAny>, line: u32) -> PyResult<TraceEvent> {
    let code = frame.getattr("f_code")?;
    Ok(TraceEvent {
        file: code.getattr("co_filename")?.extract()?,
        line,
        func: code.getattr("co_name")?.extract()?,
        locals: frame_locals(frame)?,
    })
}

fn frame_locals(frame: &Bound<'_, PyAny>) -> PyResult<Locals> {
    let items = frame.getattr("f_locals")?.call_method0("items")?;
    let bindings = items.iter()?.filter_map(|item| {
        item.and_then(|item| item.extract::<(String, Bound<'_, PyAny>)>())
            .ok()
    });
    Ok(collect_locals(bindings, |value| local_value(&value)))
}

fn exception_info(py: Python<'_>, err: &PyErr) -> ExceptionInfo {
    let value = err.value_bound(py);
    let message = value
        .str()
        .map(|text| text.to_string_lossy().into_owned())
        .unwrap_or_default();
    let frames = err
        .traceback_bound(py)
        .map(|tb| traceback_frames(tb.into_any()))
        .unwrap_or_default();
    ExceptionInfo {
        kind: type_name(value.as_any()),
        message,
        frames,
    }
}

fn traceback_frames(mut tb: Bound<'_, PyAny>) -> Vec<TraceEvent> {
    let mut frames = Vec::new();
    while !tb.is_none() {
        let entry = tb.getattr("tb_frame").and_then(|frame| {
            let line = tb.getattr("tb_lineno")?.extract::<Option<u32>>()?;
            frame_event(&frame, line.unwrap_or(0))
        });
        match entry {
            Ok(frame) => frames.push(frame),
            Err(err) => debug!(err = %err, "skipping unreadable traceback entry"),
        }
        tb = match tb.getattr("tb_next") {
            Ok(next) => next,
            Err(_) => break,
        };
    }
    frames
}

fn local_value(value: &Bound<'_, PyAny>) -> LocalValue {
    let mut budget = MAX_NATIVE_NODES;
    match native_json(value, 0, &mut budget) {
        Some(json) => LocalValue::Native(json),
        None => LocalValue::fallback(&repr_of(value), type_name(value)),
    }
}

/// Convert values with an exact JSON form. `None` means "use a fallback".
///
/// `budget` counts down the nodes still allowed for this value.
fn native_json(value: &Bound<'_, PyAny>, depth: usize, budget: &mut usize) -> Option<Value> {
    if depth > MAX_NESTING || *budget == 0 {
        return None;
    }
    *budget -= 1;
    if value.is_none() {
        return Some(Value::Null);
    }
    if value.is_instance_of::<PyBool>() {
        return value.extract::<bool>().ok().map(Value::Bool);
    }
    if value.is_instance_of::<PyLong>() {
        return value
            .extract::<i64>()
            .map(Value::from)
            .or_else(|_| value.extract::<u64>().map(Value::from))
            .ok();
    }
    if value.is_instance_of::<PyFloat>() {
        // NaN and infinities have no JSON spelling.
        let float = value.extract::<f64>().ok()?;
        return Number::from_f64(float).map(Value::Number);
    }
    if let Ok(text) = value.downcast::<PyString>() {
        if text.len().ok()? > MAX_NATIVE_STR_CHARS {
            return None;
        }
        return text.extract::<String>().ok().map(Value::String);
    }
    if let Ok(list) = value.downcast::<PyList>() {
        if list.len() > *budget {
            return None;
        }
        return list
            .iter()
            .map(|item| native_json(&item, depth + 1, budget))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array);
    }
    if let Ok(tuple) = value.downcast::<PyTuple>() {
        if tuple.len() > *budget {
            return None;
        }
        return tuple
            .iter()
            .map(|item| native_json(&item, depth + 1, budget))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array);
    }
    if let Ok(dict) = value.downcast::<PyDict>() {
        if dict.len() > *budget {
            return None;
        }
        let mut map = Map::new();
        for (key, item) in dict.iter() {
            map.insert(json_key(&key)?, native_json(&item, depth + 1, budget)?);
        }
        return Some(Value::Object(map));
    }
    None
}

fn json_key(key: &Bound<'_, PyAny>) -> Option<String> {
    if key.is_instance_of::<PyString>() {
        return key.extract::<String>().ok();
    }
    if key.is_instance_of::<PyLong>() && !key.is_instance_of::<PyBool>() {
        return key
            .str()
            .ok()
            .map(|text| text.to_string_lossy().into_owned());
    }
    None
}

fn repr_of(value: &Bound<'_, PyAny>) -> String {
    value
        .repr()
        .map(|text| text.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unrepresentable>".to_string())
}

fn type_name(value: &Bound<'_, PyAny>) -> String {
    value
        .get_type()
        .getattr("__name__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| "object".to_string())
}

fn buffer_contents(buffer: &Bound<'_, PyAny>) -> String {
    buffer
        .call_method0("getvalue")
        .and_then(|text| text.extract::<String>())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::run_program;
    use crate::result::{MAX_EVENTS, MAX_LOCALS};

    fn run(program: &str) -> crate::result::ExecutionResult {
        run_program(&mut PythonHost, program)
    }

    #[test]
    fn print_hi_succeeds() {
        let result = run("print(\"hi\")\n");
        assert!(result.success);
        assert_eq!(result.stdout, "hi\n");
        assert!(result.exception.is_none());
        assert_eq!(result.trace.len(), 1);
    }

    #[test]
    fn division_by_zero_reports_failing_line() {
        let result = run("a = 1\nb = 0\nc = a / b\n");
        assert!(!result.success);
        let exception = result.exception.expect("exception");
        assert_eq!(exception.kind, "ZeroDivisionError");
        let last = exception.frames.last().expect("frames");
        assert_eq!(last.line, 3);
        assert_eq!(last.locals.get("b"), Some(&LocalValue::Native(Value::from(0))));
    }

    #[test]
    fn stderr_is_captured() {
        let result = run("import sys\nsys.stderr.write('warn\\n')\n");
        assert!(result.success);
        assert_eq!(result.stderr, "warn\n");
        assert_eq!(result.stdout, "");
    }

    #[test]
    fn exit_request_is_a_failure() {
        let result = run("import sys\nsys.exit(3)\n");
        assert!(!result.success);
        assert_eq!(result.exception.map(|e| e.kind).as_deref(), Some("SystemExit"));
    }

    #[test]
    fn syntax_error_is_a_failure() {
        let result = run("def broken(:\n");
        assert!(!result.success);
        assert_eq!(result.exception.map(|e| e.kind).as_deref(), Some("SyntaxError"));
    }

    #[test]
    fn long_loops_keep_the_latest_events() {
        let result = run("total = 0\nfor i in range(500):\n    total += i\n");
        assert!(result.success);
        assert_eq!(result.trace.len(), MAX_EVENTS);
        let last = result.trace.last().expect("event");
        assert_eq!(last.locals.get("i"), Some(&LocalValue::Native(Value::from(499))));
    }

    #[test]
    fn locals_are_capped_and_internal_names_hidden() {
        let mut program: String = (0..40).map(|i| format!("v{i} = {i}\n")).collect();
        program.push_str("raise ValueError('stop')\n");
        let result = run(&program);
        let exception = result.exception.expect("exception");
        let frame = exception.frames.last().expect("frame");
        assert_eq!(frame.locals.len(), MAX_LOCALS);
        assert!(frame.locals.iter().all(|(name, _)| !name.starts_with("__")));
    }

    #[test]
    fn unencodable_local_falls_back_to_repr() {
        let program = "class Foo:\n    pass\n\nobj = Foo()\nraise RuntimeError('x')\n";
        let result = run(program);
        let exception = result.clone().exception.expect("exception");
        let frame = exception.frames.last().expect("frame");
        match frame.locals.get("obj") {
            Some(LocalValue::Fallback(fallback)) => {
                assert_eq!(fallback.type_name, "Foo");
                assert!(fallback.repr.contains("Foo object"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        let line = serde_json::to_string(&result).expect("serialize");
        let _: Value = serde_json::from_str(&line).expect("valid json");
    }

    #[test]
    fn library_frames_are_not_traced() {
        let result = run("import json\ntext = json.dumps({'a': 1})\n");
        assert!(result.success);
        assert!(result.trace.iter().all(|e| e.file == PROGRAM_FILENAME));
    }

    #[test]
    fn oversized_values_fall_back_to_repr() {
        let program = "big = list(range(200000))\ntext = 'x' * 10000\nsmall = [1, 2]\nraise RuntimeError('x')\n";
        let result = run(program);
        let exception = result.exception.expect("exception");
        let frame = exception.frames.last().expect("frame");
        for name in ["big", "text"] {
            match frame.locals.get(name) {
                Some(LocalValue::Fallback(fallback)) => {
                    assert_eq!(fallback.repr.chars().count(), crate::result::MAX_REPR_CHARS);
                }
                other => panic!("expected fallback for {name}, got {other:?}"),
            }
        }
        assert_eq!(
            frame.locals.get("small"),
            Some(&LocalValue::Native(serde_json::json!([1, 2])))
        );
    }

    #[test]
    fn raw_descriptor_writes_stay_off_stdout() {
        let result = run("import os\nos.write(1, b'raw\\n')\nprint('ok')\n");
        assert!(result.success, "{result:?}");
        assert_eq!(result.stdout, "ok\n");
    }
}
