//! Sandbox entrypoint: program on stdin, one JSON result line on stdout.

use std::io::{self, Read};

use anyhow::{Context, Result};
use harness::{PythonHost, logging, run_program, write_result_line};
use tracing::{error, info};

fn main() {
    logging::init();
    if let Err(err) = run() {
        error!(err = %format!("{err:#}"), "harness failed");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut raw = Vec::new();
    io::stdin()
        .read_to_end(&mut raw)
        .context("read program from stdin")?;
    let program = String::from_utf8_lossy(&raw);

    let result = run_program(&mut PythonHost, &program);
    info!(
        success = result.success,
        duration_ms = result.duration_ms,
        "program finished"
    );

    write_result_line(io::stdout().lock(), &result).context("write result line")?;
    Ok(())
}
