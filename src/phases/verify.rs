//! # Phase 4: Verification
//!
//! Checks a plan or a merged directory at one of three cumulative tiers:
//!
//! - **static**: structure only (root manifest, workspace configuration,
//!   per-package fields, script references, cycles, engines)
//! - **install**: static, plus running the install command and checking
//!   its results
//! - **full**: install, plus every package's `build` and `test` scripts,
//!   run concurrently
//!
//! Every check yields exactly one pass/warn/fail. A failing check never
//! stops the others from running.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use log::Level;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::plan::PNPM_WORKSPACE_FILE;
use super::{EventSink, emit_log};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::filesystem;
use crate::graph::{self, CycleRecord};
use crate::lockfile;
use crate::manifest::{MANIFEST_FILE, PackageDescriptor, PackageManifest};
use crate::package_manager::PackageManager;
use crate::plan::ApplyPlan;
use crate::process;

/// Script references that name a workspace package.
static PACKAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:--filter(?:=|\s+)|(?:^|\s)-w\s+|\bworkspace\s+)['"]?([^\s'";&|]+)"#)
        .expect("package reference regex is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyTier {
    #[default]
    Static,
    Install,
    Full,
}

impl VerifyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyTier::Static => "static",
            VerifyTier::Install => "install",
            VerifyTier::Full => "full",
        }
    }
}

impl fmt::Display for VerifyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerifyTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(VerifyTier::Static),
            "install" => Ok(VerifyTier::Install),
            "full" => Ok(VerifyTier::Full),
            other => Err(Error::ConfigParse {
                message: format!("Unknown verify tier '{}'", other),
                hint: Some("Use one of: static, install, full".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCheck {
    pub id: String,
    pub message: String,
    pub status: CheckStatus,
    pub tier: VerifyTier,
    /// Location in the plan the check is about, when verifying a plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl VerifyCheck {
    fn new(id: impl Into<String>, tier: VerifyTier, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            status,
            tier,
            plan_ref: None,
            details: None,
        }
    }

    fn with_plan_ref(mut self, plan_ref: Option<String>) -> Self {
        self.plan_ref = plan_ref;
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySummary {
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub tier: VerifyTier,
    pub checks: Vec<VerifyCheck>,
    pub summary: VerifySummary,
    pub ok: bool,
}

impl VerifyResult {
    fn from_checks(tier: VerifyTier, checks: Vec<VerifyCheck>) -> Self {
        let mut summary = VerifySummary::default();
        for check in &checks {
            match check.status {
                CheckStatus::Pass => summary.pass += 1,
                CheckStatus::Warn => summary.warn += 1,
                CheckStatus::Fail => summary.fail += 1,
            }
        }
        Self {
            tier,
            ok: summary.fail == 0,
            checks,
            summary,
        }
    }

    pub fn check(&self, id: &str) -> Option<&VerifyCheck> {
        self.checks.iter().find(|c| c.id == id)
    }
}

/// What to verify.
#[derive(Debug, Clone, Copy)]
pub enum VerifyTarget<'a> {
    Plan(&'a ApplyPlan),
    Directory(&'a Path),
}

/// One workspace package as the static checks see it.
#[derive(Debug, Clone)]
struct PackageView {
    label: String,
    name: Option<String>,
    version: Option<String>,
    dir: Option<PathBuf>,
    scripts: BTreeSet<String>,
    plan_ref: Option<String>,
    error: Option<String>,
}

/// The shape of a workspace, read from a plan or from disk.
#[derive(Debug, Clone)]
struct WorkspaceView {
    root: Value,
    root_error: Option<String>,
    workspace_file: bool,
    /// `None` when the package list cannot be known (a plan without findings).
    packages: Option<Vec<PackageView>>,
    cycles: Vec<CycleRecord>,
    from_plan: bool,
}

impl WorkspaceView {
    fn plan_ref(&self, reference: &str) -> Option<String> {
        self.from_plan.then(|| reference.to_string())
    }

    fn package_names(&self) -> BTreeSet<&str> {
        self.packages
            .iter()
            .flatten()
            .filter_map(|p| p.name.as_deref())
            .collect()
    }

    fn package_manager(&self) -> Option<PackageManager> {
        self.root
            .get("packageManager")
            .and_then(Value::as_str)
            .and_then(PackageManager::from_package_manager_field)
    }

    fn from_plan(plan: &ApplyPlan) -> Self {
        let mut view = Self {
            root: plan.root_package_json.clone(),
            root_error: None,
            workspace_file: plan
                .files
                .iter()
                .any(|f| f.relative_path == PNPM_WORKSPACE_FILE),
            packages: None,
            cycles: Vec::new(),
            from_plan: true,
        };
        let Some(findings) = &plan.analysis_findings else {
            return view;
        };
        view.cycles = findings.report.cycles.clone();

        let packages = plan
            .sources
            .iter()
            .map(|source| {
                let descriptor = findings
                    .package_dirs
                    .iter()
                    .find(|(_, dest)| **dest == source.name)
                    .and_then(|(repo, _)| findings.report.package_for(repo));
                let rewritten = format!("{}/{}/{}", plan.packages_dir, source.name, MANIFEST_FILE);
                let manifest = plan
                    .files
                    .iter()
                    .find(|f| f.relative_path == rewritten)
                    .and_then(|f| PackageManifest::parse(&f.content, &rewritten).ok());

                let (name, version, scripts) = match (manifest, descriptor) {
                    (Some(m), _) => (
                        m.name.clone(),
                        m.version.clone(),
                        m.scripts.clone().unwrap_or_default().into_keys().collect(),
                    ),
                    (None, Some(d)) => (
                        Some(d.name.clone()),
                        Some(d.version.clone()),
                        d.scripts.keys().cloned().collect(),
                    ),
                    (None, None) => (None, None, BTreeSet::new()),
                };
                PackageView {
                    label: source.name.clone(),
                    name,
                    version,
                    dir: None,
                    scripts,
                    plan_ref: Some(format!("sources[{}]", source.name)),
                    error: None,
                }
            })
            .collect();
        view.packages = Some(packages);
        view
    }

    fn from_directory(dir: &Path) -> Self {
        let (root, root_error) = match PackageManifest::from_dir(dir).and_then(|m| m.to_value()) {
            Ok(value) => (value, None),
            Err(e) => (Value::Null, Some(e.to_string())),
        };

        let workspace_file_path = dir.join(PNPM_WORKSPACE_FILE);
        let workspace_file = workspace_file_path.is_file();
        let patterns = workspace_patterns(&root, &workspace_file_path);
        let dirs = filesystem::expand_workspace_globs(dir, &patterns).unwrap_or_default();

        let mut packages = Vec::with_capacity(dirs.len());
        let mut descriptors = Vec::with_capacity(dirs.len());
        for package_dir in dirs {
            let label = package_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match PackageManifest::from_dir(&package_dir) {
                Ok(manifest) => {
                    if manifest.name.is_some() {
                        descriptors.push(PackageDescriptor::from_manifest(&label, &package_dir, &manifest));
                    }
                    packages.push(PackageView {
                        label: manifest.name.clone().unwrap_or_else(|| label.clone()),
                        name: manifest.name,
                        version: manifest.version,
                        dir: Some(package_dir),
                        scripts: manifest.scripts.unwrap_or_default().into_keys().collect(),
                        plan_ref: None,
                        error: None,
                    });
                }
                Err(e) => packages.push(PackageView {
                    label,
                    name: None,
                    version: None,
                    dir: Some(package_dir),
                    scripts: BTreeSet::new(),
                    plan_ref: None,
                    error: Some(e.to_string()),
                }),
            }
        }

        let cycles = graph::find_cycles(&graph::cross_edges(&descriptors));
        Self {
            root,
            root_error,
            workspace_file,
            packages: Some(packages),
            cycles,
            from_plan: false,
        }
    }
}

#[derive(Deserialize)]
struct PnpmWorkspace {
    #[serde(default)]
    packages: Vec<String>,
}

/// Workspace globs from `pnpm-workspace.yaml`, or the root `workspaces`
/// field (array form or `{ "packages": [...] }`).
fn workspace_patterns(root: &Value, workspace_file: &Path) -> Vec<String> {
    if let Ok(content) = std::fs::read_to_string(workspace_file)
        && let Ok(parsed) = serde_yaml::from_str::<PnpmWorkspace>(&content)
    {
        return parsed.packages;
    }
    let field = root.get("workspaces");
    let list = field
        .and_then(Value::as_array)
        .or_else(|| field.and_then(|w| w.get("packages")).and_then(Value::as_array));
    list.map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Package names referenced by `--filter`, `-w` and `workspace` in scripts.
/// Patterns (paths, globs, selectors) are not names and are left out.
pub fn script_package_refs(script: &str) -> Vec<String> {
    PACKAGE_REF
        .captures_iter(script)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| {
            !name.starts_with('.')
                && !name.starts_with('-')
                && !name.contains(['*', '{', '[', '!', '='])
                && !name.ends_with("...")
        })
        .collect()
}

fn static_checks(view: &WorkspaceView) -> Vec<VerifyCheck> {
    let tier = VerifyTier::Static;
    let mut checks = Vec::new();

    let private = if let Some(error) = &view.root_error {
        VerifyCheck::new("root-private", tier, CheckStatus::Fail, format!("No readable root manifest: {}", error))
    } else if view.root.get("private").and_then(Value::as_bool) == Some(true) {
        VerifyCheck::new("root-private", tier, CheckStatus::Pass, "Root package is private")
    } else {
        VerifyCheck::new("root-private", tier, CheckStatus::Fail, "Root package must set \"private\": true")
    };
    checks.push(private.with_plan_ref(view.plan_ref("rootPackageJson.private")));

    let name = match view.root.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => {
            VerifyCheck::new("root-name", tier, CheckStatus::Pass, format!("Root package is named {}", name))
        }
        _ => VerifyCheck::new("root-name", tier, CheckStatus::Fail, "Root package has no name"),
    };
    checks.push(name.with_plan_ref(view.plan_ref("rootPackageJson.name")));

    let workspace = if view.workspace_file {
        VerifyCheck::new("workspace-config", tier, CheckStatus::Pass, "Workspaces declared in pnpm-workspace.yaml")
            .with_plan_ref(view.plan_ref("files[pnpm-workspace.yaml]"))
    } else if view.root.get("workspaces").is_some() {
        VerifyCheck::new("workspace-config", tier, CheckStatus::Pass, "Workspaces declared in the root manifest")
            .with_plan_ref(view.plan_ref("rootPackageJson.workspaces"))
    } else {
        VerifyCheck::new(
            "workspace-config",
            tier,
            CheckStatus::Fail,
            "Neither pnpm-workspace.yaml nor a workspaces field is present",
        )
        .with_plan_ref(view.plan_ref("rootPackageJson.workspaces"))
    };
    checks.push(workspace);

    match &view.packages {
        Some(packages) => {
            for package in packages {
                let id = format!("package-fields:{}", package.label);
                let check = match (&package.error, &package.name, &package.version) {
                    (Some(error), _, _) => VerifyCheck::new(id, tier, CheckStatus::Fail, error.clone()),
                    (None, Some(name), Some(version)) => {
                        VerifyCheck::new(id, tier, CheckStatus::Pass, format!("{}@{}", name, version))
                    }
                    (None, name, version) => {
                        let missing: Vec<&str> = [("name", name.is_none()), ("version", version.is_none())]
                            .into_iter()
                            .filter(|(_, missing)| *missing)
                            .map(|(field, _)| field)
                            .collect();
                        VerifyCheck::new(
                            id,
                            tier,
                            CheckStatus::Fail,
                            format!("Missing {}", missing.join(" and ")),
                        )
                    }
                };
                checks.push(check.with_plan_ref(package.plan_ref.clone()));
            }
        }
        None => checks.push(VerifyCheck::new(
            "package-fields",
            tier,
            CheckStatus::Warn,
            "The plan carries no analysis findings; package manifests were not checked",
        )),
    }

    checks.push(filter_refs_check(view));

    let cycles = if view.cycles.is_empty() {
        VerifyCheck::new("cycles", tier, CheckStatus::Pass, "No dependency cycles between packages")
    } else {
        let rendered: Vec<String> = view
            .cycles
            .iter()
            .map(|c| {
                let mut nodes = c.nodes.clone();
                if let Some(first) = c.nodes.first() {
                    nodes.push(first.clone());
                }
                nodes.join(" -> ")
            })
            .collect();
        VerifyCheck::new(
            "cycles",
            tier,
            CheckStatus::Warn,
            format!("{} dependency cycle(s) between packages", view.cycles.len()),
        )
        .with_details(json!(rendered))
    };
    checks.push(cycles.with_plan_ref(view.plan_ref("analysisFindings.cycles")));

    let engines = match view.root.get("engines").and_then(|e| e.get("node")).and_then(Value::as_str) {
        Some(range) => VerifyCheck::new("engines", tier, CheckStatus::Pass, format!("Node {}", range)),
        None => VerifyCheck::new("engines", tier, CheckStatus::Warn, "Root manifest declares no engines.node"),
    };
    checks.push(engines.with_plan_ref(view.plan_ref("rootPackageJson.engines")));

    checks
}

fn filter_refs_check(view: &WorkspaceView) -> VerifyCheck {
    let tier = VerifyTier::Static;
    let plan_ref = view.plan_ref("rootPackageJson.scripts");
    let Some(scripts) = view.root.get("scripts").and_then(Value::as_object) else {
        return VerifyCheck::new("filter-refs", tier, CheckStatus::Pass, "No root scripts").with_plan_ref(plan_ref);
    };
    if view.packages.is_none() {
        return VerifyCheck::new(
            "filter-refs",
            tier,
            CheckStatus::Warn,
            "Package names unknown; script references were not checked",
        )
        .with_plan_ref(plan_ref);
    }

    let known = view.package_names();
    let mut checked = 0;
    let mut unresolved = Vec::new();
    for (script, body) in scripts {
        let Some(body) = body.as_str() else { continue };
        for reference in script_package_refs(body) {
            checked += 1;
            if !known.contains(reference.as_str()) {
                unresolved.push(json!({"script": script, "package": reference}));
            }
        }
    }

    let check = if unresolved.is_empty() {
        VerifyCheck::new(
            "filter-refs",
            tier,
            CheckStatus::Pass,
            format!("{} package reference(s) resolve", checked),
        )
    } else {
        VerifyCheck::new(
            "filter-refs",
            tier,
            CheckStatus::Fail,
            format!("{} script reference(s) name no workspace package", unresolved.len()),
        )
        .with_details(Value::Array(unresolved))
    };
    check.with_plan_ref(plan_ref)
}

fn command_details(output: &process::CommandOutput) -> Value {
    json!({
        "exitCode": output.code,
        "durationMs": output.duration.as_millis() as u64,
        "output": output.tail(20),
    })
}

/// Run `command` in `dir` and turn the outcome into a check.
fn command_check(
    id: String,
    tier: VerifyTier,
    command: &str,
    dir: &Path,
    cancel: &CancelToken,
) -> Result<VerifyCheck> {
    match process::run_shell(command, dir, cancel) {
        Ok(output) if output.success => Ok(VerifyCheck::new(id, tier, CheckStatus::Pass, format!("`{}` succeeded", command))
            .with_details(command_details(&output))),
        Ok(output) => Ok(VerifyCheck::new(id, tier, CheckStatus::Fail, format!("`{}` failed", command))
            .with_details(command_details(&output))),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => Ok(VerifyCheck::new(id, tier, CheckStatus::Fail, e.to_string())),
    }
}

fn install_checks(dir: &Path, view: &WorkspaceView, cancel: &CancelToken) -> Result<Vec<VerifyCheck>> {
    let tier = VerifyTier::Install;
    let pm = view
        .package_manager()
        .or_else(|| lockfile::detect_package_manager(dir))
        .unwrap_or(PackageManager::Npm);

    let mut checks = vec![command_check("install".to_string(), tier, &pm.install_command(), dir, cancel)?];

    checks.push(match lockfile::require_non_empty(dir) {
        Ok(path) => VerifyCheck::new(
            "lockfile",
            tier,
            CheckStatus::Pass,
            format!("Found {}", path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()),
        ),
        Err(e) => VerifyCheck::new("lockfile", tier, CheckStatus::Fail, e.to_string()),
    });

    checks.push(if dir.join("node_modules").is_dir() {
        VerifyCheck::new("node-modules", tier, CheckStatus::Pass, "node_modules is present")
    } else {
        VerifyCheck::new("node-modules", tier, CheckStatus::Fail, "node_modules is missing")
    });
    Ok(checks)
}

/// `build:<pkg>` and `test:<pkg>` for every package defining them. Packages
/// run concurrently; within a package, build runs before test.
fn full_checks<F>(view: &WorkspaceView, cancel: &CancelToken, command_for: F) -> Result<Vec<VerifyCheck>>
where
    F: Fn(&str) -> String + Sync,
{
    let jobs: Vec<(&PackageView, &Path)> = view
        .packages
        .iter()
        .flatten()
        .filter_map(|p| p.dir.as_deref().map(|dir| (p, dir)))
        .filter(|(p, _)| p.scripts.contains("build") || p.scripts.contains("test"))
        .collect();

    let per_package = jobs
        .par_iter()
        .map(|(package, dir)| {
            let mut checks = Vec::new();
            for script in ["build", "test"] {
                if package.scripts.contains(script) {
                    checks.push(command_check(
                        format!("{}:{}", script, package.label),
                        VerifyTier::Full,
                        &command_for(script),
                        dir,
                        cancel,
                    )?);
                }
            }
            Ok(checks)
        })
        .collect::<Result<Vec<Vec<VerifyCheck>>>>()?;
    Ok(per_package.into_iter().flatten().collect())
}

/// Verify `target` at `tier`.
///
/// Plans can only be checked statically; asking for a higher tier adds a
/// warning and verifies at the static tier.
pub fn execute(
    target: VerifyTarget<'_>,
    tier: VerifyTier,
    cancel: &CancelToken,
    sink: &dyn EventSink,
) -> Result<VerifyResult> {
    let (view, effective, mut checks) = match target {
        VerifyTarget::Plan(plan) => {
            plan.validate()?;
            let mut checks = Vec::new();
            if tier > VerifyTier::Static {
                checks.push(VerifyCheck::new(
                    "tier",
                    VerifyTier::Static,
                    CheckStatus::Warn,
                    format!("The {} tier needs a merged directory; a plan is verified statically", tier),
                ));
            }
            (WorkspaceView::from_plan(plan), VerifyTier::Static, checks)
        }
        VerifyTarget::Directory(dir) => {
            if !dir.is_dir() {
                return Err(Error::Filesystem {
                    message: format!("{} is not a directory", dir.display()),
                });
            }
            (WorkspaceView::from_directory(dir), tier, Vec::new())
        }
    };

    emit_log(sink, Level::Info, format!("Verifying at the {} tier", effective));
    checks.extend(static_checks(&view));

    if let VerifyTarget::Directory(dir) = target {
        if effective >= VerifyTier::Install {
            emit_log(sink, Level::Info, "Running install checks");
            checks.extend(install_checks(dir, &view, cancel)?);
        }
        if effective >= VerifyTier::Full {
            emit_log(sink, Level::Info, "Running build and test scripts");
            let pm = view.package_manager().unwrap_or(PackageManager::Npm);
            checks.extend(full_checks(&view, cancel, |script| pm.run_script(script))?);
        }
    }

    for check in checks.iter().filter(|c| c.status != CheckStatus::Pass) {
        let level = if check.status == CheckStatus::Fail {
            Level::Warn
        } else {
            Level::Info
        };
        emit_log(sink, level, format!("{}: {}", check.id, check.message));
    }

    Ok(VerifyResult::from_checks(effective, checks))
}
