//! # Apply Plan
//!
//! The plan file is the only hand-off between planning and execution. It is
//! written once, never edited by the tool afterwards, and fully describes
//! what apply will do, so apply never repeats any analysis.
//!
//! ## Schema (version 1, camelCase JSON)
//!
//! ```json
//! {
//!   "version": 1,
//!   "sources": [{ "name": "web", "path": "/work/run/web" }],
//!   "packagesDir": "packages",
//!   "rootPackageJson": { "name": "monorepo", "private": true },
//!   "files": [{ "relativePath": "pnpm-workspace.yaml", "content": "..." }],
//!   "install": true,
//!   "installCommand": "pnpm install",
//!   "analysisFindings": { ... }
//! }
//! ```
//!
//! Unknown top-level fields are rejected, as is anything that would make
//! apply write outside the output directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::filesystem::is_safe_relative;
use crate::manifest::MANIFEST_FILE;
use crate::phases::analyze::AnalysisReport;
use crate::resolver::Resolution;

/// The only plan schema version this build reads and writes.
pub const PLAN_VERSION: u32 = 1;

/// One acquired source repository to move into the packages directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanSource {
    /// Destination directory name under `packagesDir`.
    pub name: String,
    /// Where the acquired source currently lives.
    pub path: PathBuf,
}

/// A file written verbatim, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanFile {
    pub relative_path: String,
    pub content: String,
}

/// Analysis results embedded in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFindings {
    #[serde(flatten)]
    pub report: AnalysisReport,
    pub resolution: Resolution,
    /// Destination directory per repository.
    pub package_dirs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplyPlan {
    pub version: u32,
    pub sources: Vec<PlanSource>,
    pub packages_dir: String,
    pub root_package_json: Value,
    #[serde(default)]
    pub files: Vec<PlanFile>,
    pub install: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_findings: Option<AnalysisFindings>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::PlanValidation {
        message: message.into(),
    }
}

impl ApplyPlan {
    /// Check the structural rules apply and verify rely on.
    pub fn validate(&self) -> Result<()> {
        if self.version != PLAN_VERSION {
            return Err(invalid(format!(
                "unsupported plan version {} (expected {})",
                self.version, PLAN_VERSION
            )));
        }
        if !is_safe_relative(&self.packages_dir) {
            return Err(invalid(format!(
                "packagesDir must be a relative path inside the output: '{}'",
                self.packages_dir
            )));
        }
        if self.sources.is_empty() {
            return Err(invalid("plan has no sources"));
        }

        let mut names = BTreeSet::new();
        for source in &self.sources {
            if source.name.is_empty() || source.name.contains(['/', '\\']) || source.name.starts_with('.') {
                return Err(invalid(format!("invalid source name '{}'", source.name)));
            }
            if !names.insert(source.name.as_str()) {
                return Err(invalid(format!("duplicate source name '{}'", source.name)));
            }
        }

        if !self.root_package_json.is_object() {
            return Err(invalid("rootPackageJson must be a JSON object"));
        }

        let mut paths = BTreeSet::new();
        for file in &self.files {
            if !is_safe_relative(&file.relative_path) {
                return Err(invalid(format!("unsafe file path '{}'", file.relative_path)));
            }
            if file.relative_path.trim_start_matches("./") == MANIFEST_FILE {
                return Err(invalid("the root package.json belongs in rootPackageJson"));
            }
            if !paths.insert(file.relative_path.as_str()) {
                return Err(invalid(format!("duplicate file path '{}'", file.relative_path)));
            }
        }

        if let Some(command) = &self.install_command
            && command.trim().is_empty()
        {
            return Err(invalid("installCommand must not be empty"));
        }
        Ok(())
    }

    /// Package count as apply reports it.
    pub fn package_count(&self) -> usize {
        self.sources.len()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        Ok(content)
    }
}

/// SHA-256 (hex) of plan file bytes. Identifies a plan for resumption.
pub fn plan_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parse and validate plan JSON.
pub fn parse_plan(content: &str) -> Result<ApplyPlan> {
    let plan: ApplyPlan = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    plan.validate()?;
    Ok(plan)
}

/// A validated plan together with the hash of the bytes it was read from.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: ApplyPlan,
    pub hash: String,
}

/// Read and validate the plan at `path`.
pub fn read_plan(path: &Path) -> Result<LoadedPlan> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8(bytes).map_err(|e| invalid(format!("plan is not UTF-8: {}", e)))?;
    let plan = parse_plan(&content)?;
    Ok(LoadedPlan {
        hash: plan_hash(content.as_bytes()),
        plan,
    })
}

/// Validate and write `plan` to `path`. Returns the plan hash.
pub fn write_plan(path: &Path, plan: &ApplyPlan) -> Result<String> {
    plan.validate()?;
    let content = plan.to_json()?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &content)?;
    Ok(plan_hash(content.as_bytes()))
}
