//! # Verify Command Implementation
//!
//! Checks either a plan file or a merged monorepo directory. Plans are only
//! checked statically; directories can also be installed (`--tier install`)
//! and have every package's build and test scripts run (`--tier full`).
//!
//! The command exits with an error when any check fails. Warnings alone do
//! not fail it.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Args};

use monorepo_merge::output::render_verify;
use monorepo_merge::phases::NullSink;
use monorepo_merge::phases::orchestrator::{self, VerifyOptions, VerifySubject};
use monorepo_merge::phases::verify::VerifyTier;

use super::GlobalOptions;

/// Verify a plan or a merged monorepo
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("subject").required(true).args(["plan", "dir"])))]
pub struct VerifyArgs {
    /// Plan file to check.
    #[arg(long, value_name = "PATH")]
    pub plan: Option<PathBuf>,

    /// Merged monorepo directory to check.
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// How far to go: static, install or full.
    #[arg(long, value_name = "TIER", default_value = "static")]
    pub tier: VerifyTier,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

impl VerifyArgs {
    fn subject(&self) -> Result<VerifySubject> {
        match (&self.plan, &self.dir) {
            (Some(plan), None) => Ok(VerifySubject::Plan(plan.clone())),
            (None, Some(dir)) => Ok(VerifySubject::Directory(dir.clone())),
            _ => anyhow::bail!("Pass exactly one of --plan or --dir"),
        }
    }
}

/// Execute the `verify` command.
pub fn execute(args: VerifyArgs, global: &GlobalOptions) -> Result<()> {
    let out = global.output();
    let config = global.load_config()?;
    let ctx = global.context(&config);

    let options = VerifyOptions {
        subject: args.subject()?,
        tier: args.tier,
    };
    let result = orchestrator::run_verify(&ctx, &options, &NullSink)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_verify(&out, &result));
    }

    if !result.ok {
        anyhow::bail!("Verification failed: {} checks failed", result.summary.fail);
    }
    Ok(())
}
