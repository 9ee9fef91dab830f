//! # Phase 3: Apply
//!
//! Executes an [`ApplyPlan`] transactionally.
//!
//! All work happens in a staging directory next to the output directory,
//! `.<out>.staging-<uuid>`, with its operation log at
//! `.<out>.staging-<uuid>.oplog.jsonl`. Steps run in a fixed order and each
//! one is recorded as started, then completed or failed. Only when every
//! step has completed is the staging directory renamed onto the output
//! path, so the output is either the previous directory or the complete
//! new one.
//!
//! Re-running apply with the same plan after a failure or cancellation
//! finds the staging directory through its log header and continues after
//! the last completed step.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::Level;
use serde::Serialize;

use super::{EventSink, emit_log};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::filesystem;
use crate::oplog::{self, OperationLog, OperationLogEntry};
use crate::package_manager::PackageManager;
use crate::plan::{self, ApplyPlan};
use crate::process;

const STAGING_MARKER: &str = ".staging-";
const LOG_SUFFIX: &str = ".oplog.jsonl";

/// The steps of an apply, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStep {
    Scaffold,
    MovePackages,
    WriteRoot,
    WriteExtras,
    Install,
}

impl ApplyStep {
    pub const ALL: [ApplyStep; 5] = [
        ApplyStep::Scaffold,
        ApplyStep::MovePackages,
        ApplyStep::WriteRoot,
        ApplyStep::WriteExtras,
        ApplyStep::Install,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyStep::Scaffold => "scaffold",
            ApplyStep::MovePackages => "move-packages",
            ApplyStep::WriteRoot => "write-root",
            ApplyStep::WriteExtras => "write-extras",
            ApplyStep::Install => "install",
        }
    }
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub plan_path: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub output_dir: PathBuf,
    pub package_count: usize,
    /// Steps found already completed in a resumed log.
    pub skipped_steps: Vec<String>,
}

/// Where a run stages its work.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Staging {
    dir: PathBuf,
    log: PathBuf,
    resumed: bool,
}

fn log_path_for(staging_dir: &Path) -> PathBuf {
    let mut name = staging_dir.as_os_str().to_os_string();
    name.push(LOG_SUFFIX);
    PathBuf::from(name)
}

/// Split the output path into its parent directory and final name.
fn split_output(output_dir: &Path) -> Result<(PathBuf, String)> {
    let name = output_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Filesystem {
            message: format!("Output path has no directory name: {}", output_dir.display()),
        })?;
    let parent = match output_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

/// Look for an earlier staging directory of `output_dir` whose log was
/// written for `plan_hash`.
fn find_resumable(parent: &Path, output_name: &str, plan_hash: &str) -> Result<Option<Staging>> {
    if !parent.is_dir() {
        return Ok(None);
    }
    let prefix = format!(".{}{}", output_name, STAGING_MARKER);
    let mut candidates = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(LOG_SUFFIX))
        else {
            continue;
        };
        let dir = parent.join(format!("{}{}", prefix, stem));
        if !dir.is_dir() {
            continue;
        }
        match oplog::read_header(&entry.path()) {
            Ok(header) if header.plan_hash == plan_hash => {
                candidates.push((header.created_at, dir, entry.path()))
            }
            Ok(_) => {}
            Err(e) => log::debug!("Ignoring {}: {}", entry.path().display(), e),
        }
    }
    // Most recent first.
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(candidates.into_iter().next().map(|(_, dir, log)| Staging {
        dir,
        log,
        resumed: true,
    }))
}

fn prepare_staging(parent: &Path, output_name: &str, plan_hash: &str) -> Result<Staging> {
    if let Some(staging) = find_resumable(parent, output_name, plan_hash)? {
        return Ok(staging);
    }
    let dir = parent.join(format!(
        ".{}{}{}",
        output_name,
        STAGING_MARKER,
        uuid::Uuid::new_v4().simple()
    ));
    fs::create_dir_all(&dir)?;
    Ok(Staging {
        log: log_path_for(&dir),
        dir,
        resumed: false,
    })
}

/// Executes the steps of one plan inside one staging directory.
struct StepRunner<'a> {
    plan: &'a ApplyPlan,
    staging: &'a Path,
    cancel: &'a CancelToken,
    sink: &'a dyn EventSink,
}

impl StepRunner<'_> {
    fn run(&self, step: ApplyStep) -> Result<Vec<String>> {
        match step {
            ApplyStep::Scaffold => self.scaffold(),
            ApplyStep::MovePackages => self.move_packages(),
            ApplyStep::WriteRoot => self.write_root(),
            ApplyStep::WriteExtras => self.write_extras(),
            ApplyStep::Install => self.install(),
        }
    }

    fn packages_root(&self) -> PathBuf {
        self.staging.join(&self.plan.packages_dir)
    }

    fn scaffold(&self) -> Result<Vec<String>> {
        fs::create_dir_all(self.packages_root())?;
        Ok(vec![self.plan.packages_dir.clone()])
    }

    /// Move every source into the packages directory. Safe to repeat after
    /// an interruption: a source that is gone but whose destination exists
    /// was already moved.
    fn move_packages(&self) -> Result<Vec<String>> {
        let root = self.packages_root();
        let mut moved = Vec::with_capacity(self.plan.sources.len());
        for source in &self.plan.sources {
            self.cancel.check(ApplyStep::MovePackages.as_str())?;
            let dest = root.join(&source.name);
            let relative = format!("{}/{}", self.plan.packages_dir, source.name);

            if !source.path.exists() {
                if dest.is_dir() {
                    emit_log(
                        self.sink,
                        Level::Debug,
                        format!("{} already moved to {}", source.name, relative),
                    );
                    moved.push(relative);
                    continue;
                }
                return Err(Error::Filesystem {
                    message: format!(
                        "Source {} for {} does not exist",
                        source.path.display(),
                        source.name
                    ),
                });
            }

            if dest.exists() {
                // Leftover of an interrupted copy; the source is still complete.
                fs::remove_dir_all(&dest)?;
            }
            filesystem::move_dir(&source.path, &dest)?;
            let nested_git = dest.join(".git");
            if nested_git.exists() {
                fs::remove_dir_all(&nested_git)?;
            }
            emit_log(
                self.sink,
                Level::Info,
                format!("Moved {} to {}", source.path.display(), relative),
            );
            moved.push(relative);
        }
        Ok(moved)
    }

    fn write_root(&self) -> Result<Vec<String>> {
        let mut content = serde_json::to_string_pretty(&self.plan.root_package_json)?;
        content.push('\n');
        filesystem::write_file(self.staging, crate::manifest::MANIFEST_FILE, &content)?;
        Ok(vec![crate::manifest::MANIFEST_FILE.to_string()])
    }

    fn write_extras(&self) -> Result<Vec<String>> {
        let mut written = Vec::with_capacity(self.plan.files.len());
        for file in &self.plan.files {
            filesystem::write_file(self.staging, &file.relative_path, &file.content)?;
            written.push(file.relative_path.clone());
        }
        Ok(written)
    }

    fn install(&self) -> Result<Vec<String>> {
        let command = install_command(self.plan);
        emit_log(self.sink, Level::Info, format!("Running `{}`", command));
        let output = process::run_shell(&command, self.staging, self.cancel).map_err(|e| {
            if e.is_cancelled() {
                Error::Cancelled {
                    step: ApplyStep::Install.as_str().to_string(),
                }
            } else {
                e
            }
        })?;
        if !output.success {
            return Err(Error::Command {
                command,
                message: format!(
                    "exited with {}: {}",
                    output
                        .code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "a signal".to_string()),
                    output.tail(20)
                ),
            });
        }
        Ok(vec![command])
    }
}

/// The install command of a plan: explicit, or derived from the root
/// `packageManager` field, or `npm install`.
pub fn install_command(plan: &ApplyPlan) -> String {
    if let Some(command) = &plan.install_command {
        return command.clone();
    }
    plan.root_package_json
        .get("packageManager")
        .and_then(|v| v.as_str())
        .and_then(PackageManager::from_package_manager_field)
        .unwrap_or(PackageManager::Npm)
        .install_command()
}

fn steps_for(plan: &ApplyPlan) -> Vec<ApplyStep> {
    ApplyStep::ALL
        .into_iter()
        .filter(|step| *step != ApplyStep::Install || plan.install)
        .collect()
}

fn step_error(step: ApplyStep, error: Error) -> Error {
    match error {
        Error::Cancelled { .. } => Error::Cancelled {
            step: step.as_str().to_string(),
        },
        Error::Step { .. } => error,
        other => Error::Step {
            step: step.as_str().to_string(),
            message: other.to_string(),
        },
    }
}

fn run_steps(
    runner: &StepRunner<'_>,
    log: &mut OperationLog,
    skipped: &mut Vec<String>,
) -> Result<()> {
    for step in steps_for(runner.plan) {
        let name = step.as_str();
        if log.is_completed(name) {
            emit_log(runner.sink, Level::Info, format!("Skipping completed step {}", name));
            skipped.push(name.to_string());
            continue;
        }

        if runner.cancel.is_cancelled() {
            log.append(OperationLogEntry::failed(name, "cancelled", Default::default()))?;
            return Err(Error::Cancelled {
                step: name.to_string(),
            });
        }

        let started = Instant::now();
        log.append(OperationLogEntry::started(name))?;
        emit_log(runner.sink, Level::Info, format!("Step {}", name));
        match runner.run(step) {
            Ok(outputs) => {
                log.append(OperationLogEntry::completed(name, outputs, started.elapsed()))?;
            }
            Err(e) => {
                let error = step_error(step, e);
                let message = if error.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    error.to_string()
                };
                log.append(OperationLogEntry::failed(name, &message, started.elapsed()))?;
                return Err(error);
            }
        }
    }
    Ok(())
}

/// Replace `output_dir` with the staging directory.
fn promote(staging: &Path, output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).map_err(|e| Error::Filesystem {
            message: format!("Failed to replace {}: {}", output_dir.display(), e),
        })?;
    }
    fs::rename(staging, output_dir).map_err(|e| Error::Filesystem {
        message: format!(
            "Failed to move {} to {}: {}",
            staging.display(),
            output_dir.display(),
            e
        ),
    })
}

/// Apply the plan at `options.plan_path` into `options.output_dir`.
///
/// On failure or cancellation the output directory is untouched. Once
/// sources have started moving, the staging directory is kept so the same
/// plan can resume; before that it is removed.
pub fn execute(
    options: &ApplyOptions,
    cancel: &CancelToken,
    sink: &dyn EventSink,
) -> Result<ApplyResult> {
    let loaded = plan::read_plan(&options.plan_path)?;
    let (parent, output_name) = split_output(&options.output_dir)?;
    fs::create_dir_all(&parent)?;

    let staging = prepare_staging(&parent, &output_name, &loaded.hash)?;
    if staging.resumed {
        emit_log(
            sink,
            Level::Info,
            format!("Resuming in {}", staging.dir.display()),
        );
    }
    let mut log = OperationLog::open_or_create(&staging.log, &loaded.hash)?;

    let runner = StepRunner {
        plan: &loaded.plan,
        staging: &staging.dir,
        cancel,
        sink,
    };
    let mut skipped_steps = Vec::new();
    if let Err(e) = run_steps(&runner, &mut log, &mut skipped_steps) {
        if log.latest(ApplyStep::MovePackages.as_str()).is_none() {
            drop(log);
            filesystem::remove_best_effort(&staging.dir);
            filesystem::remove_best_effort(&staging.log);
        } else {
            emit_log(
                sink,
                Level::Warn,
                format!(
                    "Keeping {} so the same plan can resume",
                    staging.dir.display()
                ),
            );
        }
        return Err(e);
    }

    promote(&staging.dir, &options.output_dir)?;
    drop(log);
    filesystem::remove_best_effort(&staging.log);
    emit_log(
        sink,
        Level::Info,
        format!(
            "Merged {} packages into {}",
            loaded.plan.package_count(),
            options.output_dir.display()
        ),
    );

    Ok(ApplyResult {
        output_dir: options.output_dir.clone(),
        package_count: loaded.plan.package_count(),
        skipped_steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::NullSink;
    use crate::plan::{PLAN_VERSION, PlanFile, PlanSource, write_plan};
    use serde_json::json;
    use tempfile::TempDir;

    fn source(root: &Path, name: &str) -> PathBuf {
        let path = root.join("work").join(name);
        fs::create_dir_all(path.join(".git")).unwrap();
        fs::create_dir_all(path.join("src")).unwrap();
        fs::write(
            path.join("package.json"),
            format!(r#"{{"name": "{}", "version": "1.0.0"}}"#, name),
        )
        .unwrap();
        fs::write(path.join("src/index.js"), "module.exports = 1;\n").unwrap();
        path
    }

    fn sample_plan(root: &Path, install_command: Option<String>) -> ApplyPlan {
        ApplyPlan {
            version: PLAN_VERSION,
            sources: vec![
                PlanSource {
                    name: "web".to_string(),
                    path: source(root, "web"),
                },
                PlanSource {
                    name: "api".to_string(),
                    path: source(root, "api"),
                },
            ],
            packages_dir: "packages".to_string(),
            root_package_json: json!({"name": "monorepo", "private": true, "workspaces": ["packages/*"]}),
            files: vec![PlanFile {
                relative_path: ".gitignore".to_string(),
                content: "node_modules\n".to_string(),
            }],
            install: install_command.is_some(),
            install_command,
            analysis_findings: None,
        }
    }

    fn options(root: &Path, plan: &ApplyPlan) -> ApplyOptions {
        let plan_path = root.join("plan.json");
        write_plan(&plan_path, plan).unwrap();
        ApplyOptions {
            plan_path,
            output_dir: root.join("out"),
        }
    }

    fn leftovers(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.contains(STAGING_MARKER))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_apply_without_install() {
        let temp = TempDir::new().unwrap();
        let plan = sample_plan(temp.path(), None);
        let opts = options(temp.path(), &plan);

        let result = execute(&opts, &CancelToken::new(), &NullSink).unwrap();
        assert_eq!(result.package_count, 2);
        assert!(result.skipped_steps.is_empty());

        let out = temp.path().join("out");
        assert!(out.join("packages/web/src/index.js").is_file());
        assert!(out.join("packages/api/package.json").is_file());
        assert!(!out.join("packages/web/.git").exists());
        assert_eq!(fs::read_to_string(out.join(".gitignore")).unwrap(), "node_modules\n");
        let root: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("package.json")).unwrap()).unwrap();
        assert_eq!(root["private"], true);
        assert!(!plan.sources[0].path.exists());
        assert!(leftovers(temp.path()).is_empty());
    }

    #[test]
    fn test_apply_replaces_existing_output() {
        let temp = TempDir::new().unwrap();
        let plan = sample_plan(temp.path(), None);
        let opts = options(temp.path(), &plan);
        fs::create_dir_all(opts.output_dir.join("stale")).unwrap();

        execute(&opts, &CancelToken::new(), &NullSink).unwrap();
        assert!(!opts.output_dir.join("stale").exists());
        assert!(opts.output_dir.join("package.json").is_file());
    }

    #[test]
    fn test_cancel_before_first_step_cleans_staging() {
        let temp = TempDir::new().unwrap();
        let plan = sample_plan(temp.path(), None);
        let opts = options(temp.path(), &plan);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = execute(&opts, &cancel, &NullSink).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!opts.output_dir.exists());
        assert!(plan.sources[0].path.exists());
        assert!(leftovers(temp.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_install_leaves_output_untouched_and_resumes() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("install-ok");
        let command = format!("test -f '{}'", marker.display());
        let plan = sample_plan(temp.path(), Some(command));
        let opts = options(temp.path(), &plan);
        fs::create_dir_all(opts.output_dir.join("previous")).unwrap();

        let err = execute(&opts, &CancelToken::new(), &NullSink).unwrap_err();
        assert!(matches!(err, Error::Step { ref step, .. } if step == "install"));
        assert!(opts.output_dir.join("previous").is_dir());
        assert!(!opts.output_dir.join("packages").exists());

        let staged = leftovers(temp.path());
        assert_eq!(staged.len(), 2, "{:?}", staged);
        let log_path = temp.path().join(staged.iter().find(|n| n.ends_with(LOG_SUFFIX)).unwrap());
        let log = OperationLog::open_or_create(&log_path, &plan::read_plan(&opts.plan_path).unwrap().hash)
            .unwrap();
        assert!(log.is_completed("move-packages"));
        assert_eq!(log.latest("install").unwrap().status, oplog::StepStatus::Failed);
        drop(log);

        fs::write(&marker, "").unwrap();
        let result = execute(&opts, &CancelToken::new(), &NullSink).unwrap();
        assert_eq!(
            result.skipped_steps,
            vec!["scaffold", "move-packages", "write-root", "write-extras"]
        );
        assert!(opts.output_dir.join("packages/web/package.json").is_file());
        assert!(!opts.output_dir.join("previous").exists());
        assert!(leftovers(temp.path()).is_empty());
    }

    #[test]
    fn test_move_packages_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let plan = sample_plan(temp.path(), None);
        let staging = temp.path().join("staging");
        fs::create_dir_all(staging.join("packages")).unwrap();
        let cancel = CancelToken::new();
        let runner = StepRunner {
            plan: &plan,
            staging: &staging,
            cancel: &cancel,
            sink: &NullSink,
        };

        // First source moved, then interrupted; second left half-copied.
        filesystem::move_dir(&plan.sources[0].path, &staging.join("packages/web")).unwrap();
        fs::create_dir_all(staging.join("packages/api/partial")).unwrap();

        let moved = runner.run(ApplyStep::MovePackages).unwrap();
        assert_eq!(moved, vec!["packages/web", "packages/api"]);
        assert!(staging.join("packages/api/src/index.js").is_file());
        assert!(!staging.join("packages/api/partial").exists());
    }

    #[test]
    fn test_missing_source_fails_step() {
        let temp = TempDir::new().unwrap();
        let plan = sample_plan(temp.path(), None);
        fs::remove_dir_all(&plan.sources[1].path).unwrap();
        let opts = options(temp.path(), &plan);

        let err = execute(&opts, &CancelToken::new(), &NullSink).unwrap_err();
        assert!(matches!(err, Error::Step { ref step, .. } if step == "move-packages"));
        assert!(!opts.output_dir.exists());
    }

    #[test]
    fn test_mismatched_staging_is_not_reused() {
        let temp = TempDir::new().unwrap();
        let stale_dir = temp.path().join(".out.staging-old");
        fs::create_dir_all(&stale_dir).unwrap();
        OperationLog::open_or_create(&log_path_for(&stale_dir), "other-plan").unwrap();

        let staging = prepare_staging(temp.path(), "out", "this-plan").unwrap();
        assert!(!staging.resumed);
        assert_ne!(staging.dir, stale_dir);

        let again = prepare_staging(temp.path(), "out", "other-plan").unwrap();
        assert!(again.resumed);
        assert_eq!(again.dir, stale_dir);
    }

    #[test]
    fn test_install_command_derivation() {
        let temp = TempDir::new().unwrap();
        let mut plan = sample_plan(temp.path(), None);
        assert_eq!(install_command(&plan), "npm install");
        plan.root_package_json["packageManager"] = json!("pnpm@9.12.0");
        assert_eq!(install_command(&plan), "pnpm install");
        plan.install_command = Some("yarn install --frozen-lockfile".to_string());
        assert_eq!(install_command(&plan), "yarn install --frozen-lockfile");
    }
}
