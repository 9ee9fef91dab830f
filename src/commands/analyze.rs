//! # Analyze Command Implementation
//!
//! Acquires the given repositories and reports what a merge would run into:
//! version conflicts, internal dependency cycles, shared dependency hotspots
//! and root files present in more than one repository. Nothing is written
//! outside the work directory.

use anyhow::Result;
use clap::Args;

use monorepo_merge::output::{emoji, render_analysis};
use monorepo_merge::phases::NullSink;
use monorepo_merge::phases::orchestrator;

use super::{GlobalOptions, sources};

/// Analyze repositories before merging them
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Repositories to analyze (local directories or git URLs).
    ///
    /// Defaults to the `repos` list of the configuration file.
    #[arg(value_name = "REPO")]
    pub repos: Vec<String>,

    /// Print the full report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the `analyze` command.
pub fn execute(args: AnalyzeArgs, global: &GlobalOptions) -> Result<()> {
    let out = global.output();
    let config = global.load_config()?;
    let sources = sources(args.repos, &config)?;
    let ctx = global.context(&config);

    if !args.json {
        println!(
            "{} Analyzing {} repositories",
            emoji(&out, "🔍", "[SCAN]"),
            sources.len()
        );
    }

    let report = orchestrator::run_analyze(&ctx, &sources, &NullSink)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_analysis(&out, &report));
    }
    Ok(())
}
