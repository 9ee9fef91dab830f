//! Package manager flavours and the commands/fields each one expects.
//!
//! The merge never reimplements a package manager; it only needs to know how
//! to spell a handful of things for npm, yarn and pnpm: the install command,
//! how to run a script in every workspace or in one of them, where overrides
//! live in the root manifest, and which lockfile to look for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A supported JavaScript package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub const ALL: [PackageManager; 3] = [PackageManager::Pnpm, PackageManager::Yarn, PackageManager::Npm];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }

    /// Lockfile written by this package manager at the project root.
    pub fn lockfile_name(&self) -> &'static str {
        match self {
            PackageManager::Npm => "package-lock.json",
            PackageManager::Yarn => "yarn.lock",
            PackageManager::Pnpm => "pnpm-lock.yaml",
        }
    }

    /// Version pinned in the root `packageManager` field when none is given.
    pub fn default_version(&self) -> &'static str {
        match self {
            PackageManager::Npm => crate::defaults::NPM_VERSION,
            PackageManager::Yarn => crate::defaults::YARN_VERSION,
            PackageManager::Pnpm => crate::defaults::PNPM_VERSION,
        }
    }

    pub fn install_command(&self) -> String {
        format!("{} install", self.as_str())
    }

    /// Root script body that runs `script` in every workspace package.
    pub fn run_all(&self, script: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm run {} --workspaces --if-present", script),
            PackageManager::Yarn => format!("yarn workspaces run {}", script),
            PackageManager::Pnpm => format!("pnpm -r run {}", script),
        }
    }

    /// Root script body that runs `script` in the single package `package`.
    pub fn run_in(&self, package: &str, script: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm run {} -w {}", script, package),
            PackageManager::Yarn => format!("yarn workspace {} run {}", package, script),
            PackageManager::Pnpm => format!("pnpm --filter {} run {}", package, script),
        }
    }

    /// Command that runs `script` in the current package directory.
    pub fn run_script(&self, script: &str) -> String {
        format!("{} run {}", self.as_str(), script)
    }

    /// Path of the override map inside the root manifest.
    pub fn override_field(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Npm => &["overrides"],
            PackageManager::Yarn => &["resolutions"],
            PackageManager::Pnpm => &["pnpm", "overrides"],
        }
    }

    /// Specifier used when rewriting internal cross-dependencies.
    pub fn workspace_specifier(&self) -> &'static str {
        match self {
            PackageManager::Npm => "*",
            PackageManager::Yarn | PackageManager::Pnpm => "workspace:*",
        }
    }

    /// Whether workspaces are declared in a separate `pnpm-workspace.yaml`.
    pub fn uses_workspace_file(&self) -> bool {
        matches!(self, PackageManager::Pnpm)
    }

    /// Parse the root `packageManager` field, e.g. `pnpm@9.12.0`.
    pub fn from_package_manager_field(field: &str) -> Option<Self> {
        let name = field.split('@').next()?;
        name.parse().ok()
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManager {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" => Ok(PackageManager::Npm),
            "yarn" => Ok(PackageManager::Yarn),
            "pnpm" => Ok(PackageManager::Pnpm),
            other => Err(Error::ConfigParse {
                message: format!("Unknown package manager '{}'", other),
                hint: Some("Use one of: npm, yarn, pnpm".to_string()),
            }),
        }
    }
}
