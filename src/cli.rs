//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, GlobalOptions};

/// Monorepo Merge - Combine JavaScript repositories into one workspace
#[derive(Parser, Debug)]
#[command(name = "monorepo-merge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Path to the merge configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        env = "MONOREPO_MERGE_CONFIG"
    )]
    config: Option<PathBuf>,

    /// Directory that sources are acquired into
    #[arg(long, global = true, value_name = "DIR", env = "MONOREPO_MERGE_CACHE")]
    work_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report dependency conflicts, cycles and file collisions
    Analyze(commands::analyze::AnalyzeArgs),

    /// Write an apply plan for merging the given repositories
    Plan(commands::plan::PlanArgs),

    /// Execute an apply plan into an output directory
    Apply(commands::apply::ApplyArgs),

    /// Check a plan or a merged monorepo
    Verify(commands::verify::VerifyArgs),
}

/// Initialize `env_logger`. `RUST_LOG` wins over `--log-level`.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A second initialization (tests) is harmless.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        let global = GlobalOptions {
            color: self.color,
            config: self.config,
            work_dir: self.work_dir,
        };

        match self.command {
            Commands::Analyze(args) => commands::analyze::execute(args, &global),
            Commands::Plan(args) => commands::plan::execute(args, &global),
            Commands::Apply(args) => commands::apply::execute(args, &global),
            Commands::Verify(args) => commands::verify::execute(args, &global),
        }
    }
}
