//! # Merge Configuration
//!
//! This module defines the optional `.monorepo-merge.yaml` file. Every field
//! is optional; a field left out falls back to the command-line flag or the
//! built-in default, and a command-line flag always wins over the file.
//!
//! ```yaml
//! repos:
//!   - ../web
//!   - https://github.com/acme/api.git#main
//! strategy: hoist-with-overrides
//! packageManager: pnpm
//! packagesDir: packages
//! workspaceProtocol: true
//! install: true
//! rootName: acme
//! nodeEngine: ">=20"
//! concurrency: 8
//! maxAttempts: 5
//! collisions:
//!   README.md: keep-first
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collisions::CollisionStrategy;
use crate::error::{Error, Result};
use crate::filesystem::is_safe_relative;
use crate::git::RetryPolicy;
use crate::package_manager::PackageManager;
use crate::phases::PipelineContext;
use crate::phases::plan::PlanOptions;
use crate::resolver::Strategy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MergeConfig {
    /// Sources to merge, used when none are given on the command line.
    #[serde(default)]
    pub repos: Vec<String>,
    pub strategy: Option<Strategy>,
    pub package_manager: Option<PackageManager>,
    pub package_manager_version: Option<String>,
    pub packages_dir: Option<String>,
    pub workspace_protocol: Option<bool>,
    pub install: Option<bool>,
    pub install_command: Option<String>,
    pub root_name: Option<String>,
    pub node_engine: Option<String>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    /// Strategy per colliding root file.
    #[serde(default)]
    pub collisions: BTreeMap<String, CollisionStrategy>,
}

impl MergeConfig {
    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.packages_dir
            && !is_safe_relative(dir)
        {
            return Err(Error::ConfigParse {
                message: format!("packagesDir must be a relative path: '{}'", dir),
                hint: Some("Use a directory inside the output, such as 'packages'".to_string()),
            });
        }
        if self.concurrency == Some(0) {
            return Err(Error::ConfigParse {
                message: "concurrency must be at least 1".to_string(),
                hint: None,
            });
        }
        if self.max_attempts == Some(0) {
            return Err(Error::ConfigParse {
                message: "maxAttempts must be at least 1".to_string(),
                hint: None,
            });
        }
        if let Some(command) = &self.install_command
            && command.trim().is_empty()
        {
            return Err(Error::ConfigParse {
                message: "installCommand must not be empty".to_string(),
                hint: Some("Remove the key to use the package manager's install command".to_string()),
            });
        }
        Ok(())
    }

    /// Fill `options` from the file. Call before applying command-line flags.
    pub fn apply_to(&self, options: &mut PlanOptions) {
        if let Some(strategy) = self.strategy {
            options.strategy = strategy;
        }
        if let Some(pm) = self.package_manager {
            options.package_manager = pm;
        }
        if let Some(version) = &self.package_manager_version {
            options.package_manager_version = Some(version.clone());
        }
        if let Some(dir) = &self.packages_dir {
            options.packages_dir = dir.clone();
        }
        if let Some(workspace_protocol) = self.workspace_protocol {
            options.workspace_protocol = workspace_protocol;
        }
        if let Some(install) = self.install {
            options.install = install;
        }
        if let Some(command) = &self.install_command {
            options.install_command = Some(command.clone());
        }
        if let Some(name) = &self.root_name {
            options.root_name = name.clone();
        }
        if let Some(engine) = &self.node_engine {
            options.node_engine = engine.clone();
        }
        options.collisions.extend(self.collisions.clone());
    }

    /// Adjust the pipeline context (concurrency, retry attempts).
    pub fn configure(&self, ctx: PipelineContext) -> PipelineContext {
        let mut ctx = ctx;
        if let Some(concurrency) = self.concurrency {
            ctx = ctx.with_concurrency(concurrency);
        }
        if let Some(max_attempts) = self.max_attempts {
            let retry = RetryPolicy {
                max_attempts,
                ..ctx.retry
            };
            ctx = ctx.with_retry(retry);
        }
        ctx
    }
}

/// Parse configuration YAML. An empty document is an empty configuration.
pub fn parse(yaml_content: &str) -> Result<MergeConfig> {
    if yaml_content.trim().is_empty() {
        return Ok(MergeConfig::default());
    }
    let config: MergeConfig = serde_yaml::from_str(yaml_content).map_err(|e| Error::ConfigParse {
        message: e.to_string(),
        hint: hint_for(&e.to_string()),
    })?;
    config.validate()?;
    Ok(config)
}

fn hint_for(message: &str) -> Option<String> {
    if message.contains("unknown field") {
        Some(
            "Known keys: repos, strategy, packageManager, packageManagerVersion, packagesDir, \
             workspaceProtocol, install, installCommand, rootName, nodeEngine, concurrency, \
             maxAttempts, collisions"
                .to_string(),
        )
    } else if message.contains("strategy") || message.contains("highest") {
        Some("strategy is one of: highest, lowest, isolate, hoist-with-overrides".to_string())
    } else if message.contains("pnpm") || message.contains("yarn") {
        Some("packageManager is one of: npm, yarn, pnpm".to_string())
    } else {
        None
    }
}

/// Parse the configuration file at `path`.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<MergeConfig> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}
