//! Command-line interface for shardsweep.
//!
//! Provides the node server plus operator commands for creating, inspecting
//! and resuming jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
