//! Bounded generate → execute → repair loop for Python programs.
//!
//! `fixloop run` asks a generator command for a program, runs it in a
//! disposable container under the telemetry harness, and feeds failures back
//! until the program succeeds or the attempt budget is spent. Progress is
//! checkpointed per query under `state_dir`, so an interrupted run resumes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixloop::core::machine::LoopStop;
use fixloop::core::state::thread_id;
use fixloop::exit_codes;
use fixloop::io::config::{CONFIG_FILE, FixloopConfig, load_config};
use fixloop::io::generator::CommandGenerator;
use fixloop::io::journal::Journal;
use fixloop::io::sandbox::{ContainerSandbox, ExecutionRequest, LocalSandbox, Sandbox};
use fixloop::logging;
use fixloop::orchestrate::run_loop;
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Generate a Python program, run it in a sandbox, repair it until it works"
)]
struct Cli {
    /// Config file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate and repair a program for QUERY until it runs or attempts run out.
    Run {
        query: String,
        /// Override `max_iters` from the config.
        #[arg(long)]
        max_iters: Option<u32>,
        /// Ignore and discard any checkpoint for this query.
        #[arg(long)]
        fresh: bool,
        /// Run programs with this harness binary on the host instead of a container.
        #[arg(long, value_name = "HARNESS")]
        local: Option<PathBuf>,
    },
    /// Run one program file in the sandbox and print its result JSON.
    Exec {
        file: PathBuf,
        /// Wall-clock limit in seconds (defaults to `sandbox.timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
        /// Run with this harness binary on the host instead of a container.
        #[arg(long, value_name = "HARNESS")]
        local: Option<PathBuf>,
    },
    /// Print the checkpoint thread id for QUERY.
    ThreadId { query: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            query,
            max_iters,
            fresh,
            local,
        } => {
            let mut cfg = load_config(&cli.config)?;
            if let Some(max_iters) = max_iters {
                cfg.max_iters = max_iters;
            }
            cfg.validate()?;
            cmd_run(&cfg, &query, fresh, local)
        }
        Command::Exec {
            file,
            timeout,
            local,
        } => {
            let mut cfg = load_config(&cli.config)?;
            if let Some(timeout) = timeout {
                cfg.sandbox.timeout_secs = timeout;
            }
            cfg.validate()?;
            cmd_exec(&cfg, &file, local)
        }
        Command::ThreadId { query } => {
            println!("{}", thread_id(&query));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(cfg: &FixloopConfig, query: &str, fresh: bool, local: Option<PathBuf>) -> Result<i32> {
    let journal = Journal::new(&cfg.state_dir, query);
    info!(thread_id = journal.thread_id(), "starting");
    let start = journal.resume_point(query, cfg.max_iters, fresh)?;

    let generator = CommandGenerator::new(cfg.generator.clone(), cfg.state_dir.join("generator"))
        .context("prepare generator")?;
    let sandbox = build_sandbox(cfg, local);
    let outcome = run_loop(
        start.state,
        start.phase,
        &generator,
        sandbox.as_ref(),
        cfg.sandbox.timeout(),
        |event| journal.record(event),
    )?;

    let summary = json!({
        "thread_id": outcome.thread_id,
        "attempts": outcome.attempts,
        "stop": outcome.stop,
        "code": outcome.final_state.code,
        "result": outcome.final_state.last_result,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(match outcome.stop {
        LoopStop::Solved => exit_codes::OK,
        LoopStop::Exhausted => exit_codes::FAILED,
    })
}

fn cmd_exec(cfg: &FixloopConfig, file: &Path, local: Option<PathBuf>) -> Result<i32> {
    let code =
        fs::read_to_string(file).with_context(|| format!("read program {}", file.display()))?;
    let sandbox = build_sandbox(cfg, local);
    let request = ExecutionRequest::new(code).with_timeout(cfg.sandbox.timeout());
    let result = sandbox.run(&request);
    println!("{}", serde_json::to_string(&result)?);
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn build_sandbox(cfg: &FixloopConfig, local: Option<PathBuf>) -> Box<dyn Sandbox> {
    match local {
        Some(harness) => Box::new(
            LocalSandbox::new(vec![harness.to_string_lossy().into_owned()])
                .with_output_limit(cfg.sandbox.output_limit_bytes),
        ),
        None => Box::new(ContainerSandbox::new(cfg.sandbox.clone())),
    }
}
