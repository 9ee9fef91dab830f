//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `monorepo-merge` command-line tool, one file per pipeline phase.
//!
//! ## Structure
//!
//! Each command module contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` plus the global
//!   options and calls the matching `phases::orchestrator` entry point.
//!
//! Options shared by every command (color, configuration file, work
//! directory) are collected in [`GlobalOptions`].

pub mod analyze;
pub mod apply;
pub mod plan;
pub mod verify;

use std::path::PathBuf;

use anyhow::{Context, Result};

use monorepo_merge::config::{self, MergeConfig};
use monorepo_merge::defaults;
use monorepo_merge::output::OutputConfig;
use monorepo_merge::phases::PipelineContext;

/// Options given before or after any subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub color: String,
    pub config: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

impl GlobalOptions {
    pub fn output(&self) -> OutputConfig {
        OutputConfig::from_env_and_flag(&self.color)
    }

    /// Load the configuration file.
    ///
    /// An explicit `--config` path must exist. Without one, a
    /// `.monorepo-merge.yaml` in the current directory is used when present.
    pub fn load_config(&self) -> Result<MergeConfig> {
        match &self.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                config::from_file(path)
                    .with_context(|| format!("Failed to load {}", path.display()))
            }
            None => {
                let path = PathBuf::from(defaults::CONFIG_FILE);
                if path.is_file() {
                    log::debug!("Using configuration file {}", path.display());
                    Ok(config::from_file(&path)?)
                } else {
                    Ok(MergeConfig::default())
                }
            }
        }
    }

    /// Pipeline context from `--work-dir` and the configuration file.
    pub fn context(&self, config: &MergeConfig) -> PipelineContext {
        let work_dir = self
            .work_dir
            .clone()
            .unwrap_or_else(defaults::default_work_dir);
        config.configure(PipelineContext::new(work_dir))
    }
}

/// Sources from the command line, falling back to the configuration file.
pub fn sources(cli: Vec<String>, config: &MergeConfig) -> Result<Vec<String>> {
    let sources = if cli.is_empty() {
        config.repos.clone()
    } else {
        cli
    };
    if sources.is_empty() {
        anyhow::bail!(
            "No repositories given. Pass them as arguments or list them under 'repos' in {}",
            defaults::CONFIG_FILE
        );
    }
    Ok(sources)
}
