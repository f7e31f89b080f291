//! I/O helpers for the loop driver and CLI commands.

pub mod attempt_log;
pub mod checkpoint;
pub mod config;
pub mod generator;
pub mod journal;
pub mod process;
pub mod prompt;
pub mod sandbox;
