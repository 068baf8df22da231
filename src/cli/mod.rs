//! Command-line interface for redcode-exec.
//!
//! Provides the evaluation run and single-snippet sandbox execution.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
