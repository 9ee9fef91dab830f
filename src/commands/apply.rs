//! Apply command implementation
//!
//! The apply command executes a plan written by `plan`:
//! 1. Scaffold the staging directory
//! 2. Move every source into the packages directory
//! 3. Write the root `package.json`
//! 4. Write the remaining plan files
//! 5. Run the install command (when the plan asks for it)
//!
//! The output directory only appears once every step succeeded. Running the
//! command again with the same plan resumes an interrupted apply.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;

use monorepo_merge::cancel::CancelToken;
use monorepo_merge::output::emoji;
use monorepo_merge::phases::NullSink;
use monorepo_merge::phases::apply::ApplyOptions;
use monorepo_merge::phases::orchestrator;

use super::GlobalOptions;

/// Arguments for the apply command
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Plan file written by `monorepo-merge plan`
    #[arg(long, value_name = "PATH")]
    pub plan: PathBuf,

    /// Directory that receives the merged monorepo
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Execute the apply command
pub fn execute(args: ApplyArgs, global: &GlobalOptions) -> Result<()> {
    let out = global.output();
    let config = global.load_config()?;
    let ctx = global.context(&config);

    if !args.plan.exists() {
        anyhow::bail!("Plan file not found: {}", args.plan.display());
    }

    let start_time = Instant::now();
    if !args.quiet {
        println!(
            "{} Applying {} to {}",
            emoji(&out, "🔧", "[APPLY]"),
            args.plan.display(),
            args.out.display()
        );
    }

    let options = ApplyOptions {
        plan_path: args.plan,
        output_dir: args.out,
    };
    match orchestrator::run_apply(&ctx, &options, &CancelToken::new(), &NullSink) {
        Ok(result) => {
            if !args.quiet {
                println!(
                    "{} Applied successfully in {:.2}s",
                    emoji(&out, "✅", "[OK]"),
                    start_time.elapsed().as_secs_f64()
                );
                println!("   {} packages merged", result.package_count);
                if !result.skipped_steps.is_empty() {
                    println!("   resumed after: {}", result.skipped_steps.join(", "));
                }
                println!("   Output written to: {}", result.output_dir.display());
            }
            Ok(())
        }
        Err(e) => {
            if !args.quiet {
                println!("{} Apply failed", emoji(&out, "❌", "[ERR]"));
                println!();
            }
            Err(e.into())
        }
    }
}
