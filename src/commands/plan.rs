//! # Plan Command Implementation
//!
//! Analyzes the given repositories and writes an apply plan. Options come
//! from the built-in defaults, then the configuration file, then the flags
//! below, with later sources winning.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use monorepo_merge::output::emoji;
use monorepo_merge::package_manager::PackageManager;
use monorepo_merge::phases::NullSink;
use monorepo_merge::phases::orchestrator;
use monorepo_merge::phases::plan::PlanOptions;
use monorepo_merge::resolver::Strategy;

use super::{GlobalOptions, sources};

/// Write an apply plan
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Repositories to merge (local directories or git URLs).
    ///
    /// Defaults to the `repos` list of the configuration file.
    #[arg(value_name = "REPO")]
    pub repos: Vec<String>,

    /// Where to write the plan.
    #[arg(short, long, value_name = "PATH", default_value = "plan.json")]
    pub output: PathBuf,

    /// Conflict resolution strategy (highest, lowest, isolate, hoist-with-overrides).
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Package manager of the merged workspace (npm, yarn, pnpm).
    #[arg(long, value_name = "PM")]
    pub package_manager: Option<PackageManager>,

    /// Directory inside the monorepo that receives the packages.
    #[arg(long, value_name = "DIR")]
    pub packages_dir: Option<String>,

    /// Name of the root package.
    #[arg(long, value_name = "NAME")]
    pub root_name: Option<String>,

    /// Rewrite internal dependencies to the workspace protocol.
    #[arg(long)]
    pub workspace_protocol: bool,

    /// Do not run the install step when applying.
    #[arg(long)]
    pub no_install: bool,
}

impl PlanArgs {
    fn apply_to(&self, options: &mut PlanOptions) {
        if let Some(strategy) = self.strategy {
            options.strategy = strategy;
        }
        if let Some(pm) = self.package_manager {
            options.package_manager = pm;
        }
        if let Some(dir) = &self.packages_dir {
            options.packages_dir = dir.clone();
        }
        if let Some(name) = &self.root_name {
            options.root_name = name.clone();
        }
        if self.workspace_protocol {
            options.workspace_protocol = true;
        }
        if self.no_install {
            options.install = false;
        }
    }
}

/// Execute the `plan` command.
pub fn execute(args: PlanArgs, global: &GlobalOptions) -> Result<()> {
    let out = global.output();
    let config = global.load_config()?;
    let ctx = global.context(&config);

    let mut options = PlanOptions::default();
    config.apply_to(&mut options);
    args.apply_to(&mut options);

    let sources = sources(args.repos, &config)?;
    println!(
        "{} Planning merge of {} repositories ({}, {})",
        emoji(&out, "📋", "[PLAN]"),
        sources.len(),
        options.package_manager,
        options.strategy
    );

    let outcome = orchestrator::run_plan(&ctx, &sources, &options, &args.output, &NullSink)?;
    println!(
        "{} Wrote {} ({} packages, hash {})",
        emoji(&out, "✅", "[OK]"),
        outcome.plan_path.display(),
        outcome.plan.package_count(),
        &outcome.plan_hash[..12]
    );
    if let Some(findings) = &outcome.plan.analysis_findings {
        let conflicts = findings.report.conflicts.declared.len();
        if conflicts > 0 {
            println!("   {} declared conflicts resolved", conflicts);
        }
        if !findings.report.cycles.is_empty() {
            println!(
                "{} {} dependency cycles between packages",
                emoji(&out, "⚠️ ", "[WARN]"),
                findings.report.cycles.len()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> PlanArgs {
        PlanArgs {
            repos: Vec::new(),
            output: PathBuf::from("plan.json"),
            strategy: None,
            package_manager: None,
            packages_dir: None,
            root_name: None,
            workspace_protocol: false,
            no_install: false,
        }
    }

    #[test]
    fn test_flags_override_options() {
        let mut options = PlanOptions {
            strategy: Strategy::Lowest,
            ..PlanOptions::default()
        };
        let args = PlanArgs {
            strategy: Some(Strategy::Isolate),
            package_manager: Some(PackageManager::Yarn),
            no_install: true,
            ..args()
        };
        args.apply_to(&mut options);
        assert_eq!(options.strategy, Strategy::Isolate);
        assert_eq!(options.package_manager, PackageManager::Yarn);
        assert!(!options.install);
    }

    #[test]
    fn test_unset_flags_keep_options() {
        let mut options = PlanOptions {
            workspace_protocol: true,
            packages_dir: "apps".to_string(),
            ..PlanOptions::default()
        };
        args().apply_to(&mut options);
        assert!(options.workspace_protocol);
        assert_eq!(options.packages_dir, "apps");
        assert!(options.install);
    }
}
