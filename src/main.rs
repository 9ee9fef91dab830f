//! # Monorepo Merge CLI
//!
//! This is the binary entry point for the `monorepo-merge` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Initializing logging from `--log-level` and `RUST_LOG`.
//! - Dispatching to the command that drives one pipeline phase.
//!
//! The pipeline itself lives in the `lib.rs` library crate; the binary is a
//! thin wrapper around it.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
