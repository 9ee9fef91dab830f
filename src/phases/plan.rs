//! # Phase 2: Planning
//!
//! Turns an [`AnalysisReport`] into an [`ApplyPlan`]. Every decision apply
//! will act on is made here: destination directory names, collision
//! handling, the root manifest, hoisting, overrides and the optional
//! workspace-protocol rewrite of package manifests.

use std::collections::{BTreeMap, BTreeSet};

use log::Level;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{EventSink, emit_log};
use crate::collisions::{self, CollisionStrategy, FileCollision};
use crate::defaults;
use crate::error::{Error, Result};
use crate::manifest::{DependencyType, PackageDescriptor, PackageManifest};
use crate::merge;
use crate::package_manager::PackageManager;
use crate::phases::analyze::AnalysisReport;
use crate::plan::{AnalysisFindings, ApplyPlan, PLAN_VERSION, PlanFile, PlanSource};
use crate::repository::{AcquiredRepo, sanitize_name, unique_names};
use crate::resolver::{self, Resolution, Strategy};

/// File pnpm reads its workspace globs from.
pub const PNPM_WORKSPACE_FILE: &str = "pnpm-workspace.yaml";

/// Choices that shape a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub strategy: Strategy,
    pub package_manager: PackageManager,
    /// Pinned in `packageManager`; the manager's default when `None`.
    pub package_manager_version: Option<String>,
    pub packages_dir: String,
    /// Rewrite internal cross-dependencies to the workspace protocol.
    pub workspace_protocol: bool,
    pub install: bool,
    /// Overrides the package manager's own install command.
    pub install_command: Option<String>,
    pub root_name: String,
    pub node_engine: String,
    /// Strategy per colliding root file, replacing the suggestion.
    pub collisions: BTreeMap<String, CollisionStrategy>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            package_manager: PackageManager::Pnpm,
            package_manager_version: None,
            packages_dir: defaults::PACKAGES_DIR.to_string(),
            workspace_protocol: false,
            install: true,
            install_command: None,
            root_name: defaults::ROOT_NAME.to_string(),
            node_engine: defaults::NODE_ENGINE.to_string(),
            collisions: BTreeMap::new(),
        }
    }
}

#[derive(Serialize)]
struct PnpmWorkspace {
    packages: Vec<String>,
}

/// Destination directory name for each repository, in repository order.
///
/// The unscoped, sanitized package name is preferred; the repository name
/// is used when that leaves nothing.
pub fn destination_names(repos: &[AcquiredRepo], report: &AnalysisReport) -> Vec<String> {
    let bases: Vec<String> = repos
        .iter()
        .map(|repo| {
            let from_package = report
                .package_for(&repo.name)
                .map(|p| p.name.rsplit('/').next().unwrap_or(&p.name).to_string())
                .map(|name| sanitize_name(&name))
                .unwrap_or_default();
            if from_package.is_empty() {
                repo.name.clone()
            } else {
                from_package
            }
        })
        .collect();
    unique_names(&bases)
}

/// Root scripts: one per script name running it everywhere, and one
/// `<dest>:<script>` per package script.
pub fn aggregate_scripts(
    packages: &[(&str, &PackageDescriptor)],
    pm: PackageManager,
) -> BTreeMap<String, String> {
    let mut scripts = BTreeMap::new();
    for (dest, package) in packages {
        for script in package.scripts.keys() {
            scripts
                .entry(script.clone())
                .or_insert_with(|| pm.run_all(script));
            scripts.insert(format!("{}:{}", dest, script), pm.run_in(&package.name, script));
        }
    }
    scripts
}

/// Dependencies declared with the same specifier by more than one package
/// and not in conflict, per block.
fn shared_dependencies(
    packages: &[PackageDescriptor],
    dep_type: DependencyType,
    internal: &BTreeSet<&str>,
) -> BTreeMap<String, String> {
    let mut uses: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
    for package in packages {
        for (name, specifier) in package.deps(dep_type) {
            *uses.entry(name).or_default().entry(specifier).or_default() += 1;
        }
    }
    uses.into_iter()
        .filter(|(name, _)| !internal.contains(name))
        .filter_map(|(name, specifiers)| {
            let mut iter = specifiers.into_iter();
            match (iter.next(), iter.next()) {
                (Some((specifier, count)), None) if count > 1 => {
                    Some((name.to_string(), specifier.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Root `dependencies` and `devDependencies`. A name hoisted as a runtime
/// dependency is not repeated in the dev block.
fn hoisted_blocks(
    packages: &[PackageDescriptor],
    resolution: &Resolution,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    if !resolution.hoist {
        return (BTreeMap::new(), BTreeMap::new());
    }
    let internal: BTreeSet<&str> = packages.iter().map(|p| p.name.as_str()).collect();

    let mut runtime = shared_dependencies(packages, DependencyType::Runtime, &internal);
    runtime.extend(
        resolution
            .runtime
            .iter()
            .filter(|(name, _)| !internal.contains(name.as_str()))
            .map(|(n, s)| (n.clone(), s.clone())),
    );

    let mut dev = shared_dependencies(packages, DependencyType::Dev, &internal);
    dev.extend(
        resolution
            .dev
            .iter()
            .filter(|(name, _)| !internal.contains(name.as_str()))
            .map(|(n, s)| (n.clone(), s.clone())),
    );
    dev.retain(|name, _| !runtime.contains_key(name));
    (runtime, dev)
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Build the root `package.json`.
pub fn root_manifest(
    options: &PlanOptions,
    scripts: &BTreeMap<String, String>,
    packages: &[PackageDescriptor],
    resolution: &Resolution,
) -> Result<Value> {
    let pm = options.package_manager;
    let version = options
        .package_manager_version
        .as_deref()
        .unwrap_or(pm.default_version());

    let mut root = Map::new();
    root.insert("name".to_string(), Value::String(options.root_name.clone()));
    root.insert("version".to_string(), Value::String("0.0.0".to_string()));
    root.insert("private".to_string(), Value::Bool(true));
    if !pm.uses_workspace_file() {
        root.insert(
            "workspaces".to_string(),
            Value::Array(vec![Value::String(format!("{}/*", options.packages_dir))]),
        );
    }
    root.insert("scripts".to_string(), string_map(scripts));
    let mut engines = Map::new();
    engines.insert("node".to_string(), Value::String(options.node_engine.clone()));
    root.insert("engines".to_string(), Value::Object(engines));
    root.insert(
        "packageManager".to_string(),
        Value::String(format!("{}@{}", pm, version)),
    );

    let (runtime, dev) = hoisted_blocks(packages, resolution);
    if !runtime.is_empty() {
        root.insert("dependencies".to_string(), string_map(&runtime));
    }
    if !dev.is_empty() {
        root.insert("devDependencies".to_string(), string_map(&dev));
    }

    let mut root = Value::Object(root);
    resolution.write_overrides(&mut root, pm)?;
    Ok(root)
}

fn pnpm_workspace_file(packages_dir: &str) -> Result<PlanFile> {
    let content = serde_yaml::to_string(&PnpmWorkspace {
        packages: vec![format!("{}/*", packages_dir)],
    })?;
    Ok(PlanFile {
        relative_path: PNPM_WORKSPACE_FILE.to_string(),
        content,
    })
}

/// Files written at the output root for one collision.
///
/// Returns `None` when a contribution is not text; the file then stays
/// only inside each package directory.
fn collision_files(
    collision: &FileCollision,
    strategy: CollisionStrategy,
    repos: &[AcquiredRepo],
    dest_by_repo: &BTreeMap<&str, &str>,
) -> Result<Option<Vec<PlanFile>>> {
    let mut contributions = Vec::with_capacity(collision.repos.len());
    for repo_name in &collision.repos {
        let Some(repo) = repos.iter().find(|r| &r.name == repo_name) else {
            continue;
        };
        let bytes = std::fs::read(repo.path.join(&collision.path))?;
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(None);
        };
        contributions.push((repo_name.clone(), content));
    }

    let single = |content: Option<&(String, String)>| -> Vec<PlanFile> {
        content
            .map(|(_, content)| PlanFile {
                relative_path: collision.path.clone(),
                content: content.clone(),
            })
            .into_iter()
            .collect()
    };

    let files = match strategy {
        CollisionStrategy::Merge => vec![PlanFile {
            relative_path: collision.path.clone(),
            content: merge::merge_contents(&collision.path, &contributions)?,
        }],
        CollisionStrategy::KeepFirst => single(contributions.first()),
        CollisionStrategy::KeepLast => single(contributions.last()),
        CollisionStrategy::Rename => contributions
            .iter()
            .map(|(repo, content)| PlanFile {
                relative_path: collisions::renamed(
                    &collision.path,
                    dest_by_repo.get(repo.as_str()).copied().unwrap_or(repo),
                ),
                content: content.clone(),
            })
            .collect(),
        CollisionStrategy::Skip => Vec::new(),
    };
    Ok(Some(files))
}

/// Package manifests with internal cross-dependencies switched to the
/// workspace protocol, as plan files inside the packages directory.
fn workspace_protocol_files(
    repos: &[AcquiredRepo],
    report: &AnalysisReport,
    dest_by_repo: &BTreeMap<&str, &str>,
    options: &PlanOptions,
) -> Result<Vec<PlanFile>> {
    let internal: BTreeSet<&str> = report.packages.iter().map(|p| p.name.as_str()).collect();
    let specifier = options.package_manager.workspace_specifier();
    let mut files = Vec::new();

    for repo in repos {
        let mut manifest = PackageManifest::from_dir(&repo.path)?;
        let mut changed = false;
        for dep_type in [DependencyType::Runtime, DependencyType::Dev] {
            let names: Vec<String> = manifest
                .dependencies_of(dep_type)
                .map(|deps| {
                    deps.keys()
                        .filter(|name| internal.contains(name.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            for name in names {
                changed |= manifest.set_dependency(dep_type, &name, specifier);
            }
        }
        if !changed {
            continue;
        }
        let dest = dest_by_repo
            .get(repo.name.as_str())
            .copied()
            .unwrap_or(&repo.name);
        files.push(PlanFile {
            relative_path: format!("{}/{}/package.json", options.packages_dir, dest),
            content: manifest.to_pretty_string()?,
        });
    }
    Ok(files)
}

/// Build the plan for `repos` from their analysis.
pub fn execute(
    repos: &[AcquiredRepo],
    report: &AnalysisReport,
    options: &PlanOptions,
    sink: &dyn EventSink,
) -> Result<ApplyPlan> {
    if repos.is_empty() {
        return Err(Error::PlanValidation {
            message: "nothing to plan: no repositories given".to_string(),
        });
    }

    let names = destination_names(repos, report);
    let dest_by_repo: BTreeMap<&str, &str> = repos
        .iter()
        .zip(&names)
        .map(|(repo, dest)| (repo.name.as_str(), dest.as_str()))
        .collect();

    let resolution = resolver::resolve(&report.conflicts.declared, options.strategy);
    emit_log(
        sink,
        Level::Info,
        format!(
            "Resolved {} conflicts with strategy {}",
            report.conflicts.declared.len(),
            options.strategy
        ),
    );

    let mut files = Vec::new();
    let mut reserved: BTreeSet<String> = BTreeSet::new();
    if options.package_manager.uses_workspace_file() {
        reserved.insert(PNPM_WORKSPACE_FILE.to_string());
        files.push(pnpm_workspace_file(&options.packages_dir)?);
    }

    for collision in &report.collisions {
        if reserved.contains(&collision.path) {
            emit_log(
                sink,
                Level::Warn,
                format!("{} is generated; repository copies stay in their packages", collision.path),
            );
            continue;
        }
        let strategy = options
            .collisions
            .get(&collision.path)
            .copied()
            .unwrap_or(collision.suggested);
        match collision_files(collision, strategy, repos, &dest_by_repo)? {
            Some(generated) => {
                emit_log(
                    sink,
                    Level::Debug,
                    format!("{}: {} ({} files)", collision.path, strategy, generated.len()),
                );
                files.extend(generated);
            }
            None => emit_log(
                sink,
                Level::Warn,
                format!("{} is not text; leaving it inside each package", collision.path),
            ),
        }
    }

    if options.workspace_protocol {
        files.extend(workspace_protocol_files(repos, report, &dest_by_repo, options)?);
    }

    let named: Vec<(&str, &PackageDescriptor)> = repos
        .iter()
        .zip(&names)
        .filter_map(|(repo, dest)| report.package_for(&repo.name).map(|p| (dest.as_str(), p)))
        .collect();
    let scripts = aggregate_scripts(&named, options.package_manager);
    let root_package_json = root_manifest(options, &scripts, &report.packages, &resolution)?;

    let install_command = options.install.then(|| {
        options
            .install_command
            .clone()
            .unwrap_or_else(|| options.package_manager.install_command())
    });

    let plan = ApplyPlan {
        version: PLAN_VERSION,
        sources: repos
            .iter()
            .zip(&names)
            .map(|(repo, dest)| PlanSource {
                name: dest.clone(),
                path: repo.path.clone(),
            })
            .collect(),
        packages_dir: options.packages_dir.clone(),
        root_package_json,
        files,
        install: options.install,
        install_command,
        analysis_findings: Some(AnalysisFindings {
            report: report.clone(),
            resolution,
            package_dirs: dest_by_repo
                .iter()
                .map(|(repo, dest)| (repo.to_string(), dest.to_string()))
                .collect(),
        }),
    };
    plan.validate()?;

    emit_log(
        sink,
        Level::Info,
        format!(
            "Planned {} packages into {}/ with {} extra files",
            plan.package_count(),
            plan.packages_dir,
            plan.files.len()
        ),
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::{NullSink, analyze};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn repo(root: &Path, name: &str, manifest: &str) -> AcquiredRepo {
        let path = root.join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("package.json"), manifest).unwrap();
        AcquiredRepo {
            name: name.to_string(),
            path,
            source: name.to_string(),
        }
    }

    fn build(repos: &[AcquiredRepo], options: &PlanOptions) -> ApplyPlan {
        let report = analyze::execute(repos, &NullSink).unwrap();
        execute(repos, &report, options, &NullSink).unwrap()
    }

    fn two_apps(root: &Path) -> Vec<AcquiredRepo> {
        vec![
            repo(
                root,
                "web",
                r#"{"name": "@acme/web", "version": "1.0.0",
                    "scripts": {"build": "vite build", "test": "vitest"},
                    "dependencies": {"react": "^18.2.0", "lodash": "^4.17.21"}}"#,
            ),
            repo(
                root,
                "api",
                r#"{"name": "@acme/api", "version": "2.0.0",
                    "scripts": {"build": "tsc"},
                    "dependencies": {"react": "^18.3.1", "lodash": "^4.17.21", "@acme/web": "^1.0.0"}}"#,
            ),
        ]
    }

    #[test]
    fn test_plan_pnpm_root_manifest() {
        let temp = TempDir::new().unwrap();
        let repos = two_apps(temp.path());
        let plan = build(&repos, &PlanOptions::default());

        let root = &plan.root_package_json;
        assert_eq!(root["name"], "monorepo");
        assert_eq!(root["private"], true);
        assert_eq!(root["version"], "0.0.0");
        assert_eq!(root["engines"]["node"], ">=18");
        assert_eq!(root["packageManager"], "pnpm@9.12.0");
        assert!(root.get("workspaces").is_none());
        assert_eq!(root["scripts"]["build"], "pnpm -r run build");
        assert_eq!(root["scripts"]["web:test"], "pnpm --filter @acme/web run test");
        assert_eq!(root["scripts"]["api:build"], "pnpm --filter @acme/api run build");
        // Winner of the react conflict plus the identically shared lodash.
        assert_eq!(root["dependencies"]["react"], "^18.3.1");
        assert_eq!(root["dependencies"]["lodash"], "^4.17.21");
        assert!(root["dependencies"].get("@acme/web").is_none());

        let workspace = plan
            .files
            .iter()
            .find(|f| f.relative_path == PNPM_WORKSPACE_FILE)
            .unwrap();
        assert!(workspace.content.contains("packages/*"));
        assert_eq!(plan.install_command.as_deref(), Some("pnpm install"));
        assert_eq!(plan.sources[0].name, "web");
        assert_eq!(plan.sources[1].name, "api");
    }

    #[test]
    fn test_plan_npm_workspaces_and_isolate() {
        let temp = TempDir::new().unwrap();
        let repos = two_apps(temp.path());
        let options = PlanOptions {
            package_manager: PackageManager::Npm,
            strategy: Strategy::Isolate,
            install: false,
            ..PlanOptions::default()
        };
        let plan = build(&repos, &options);

        let root = &plan.root_package_json;
        assert_eq!(root["workspaces"], serde_json::json!(["packages/*"]));
        assert!(root.get("dependencies").is_none());
        assert!(root.get("devDependencies").is_none());
        assert_eq!(root["scripts"]["build"], "npm run build --workspaces --if-present");
        assert!(plan.files.iter().all(|f| f.relative_path != PNPM_WORKSPACE_FILE));
        assert!(plan.install_command.is_none());
    }

    #[test]
    fn test_plan_hoist_with_overrides_yarn() {
        let temp = TempDir::new().unwrap();
        let repos = two_apps(temp.path());
        let options = PlanOptions {
            package_manager: PackageManager::Yarn,
            strategy: Strategy::HoistWithOverrides,
            ..PlanOptions::default()
        };
        let plan = build(&repos, &options);
        assert_eq!(plan.root_package_json["resolutions"]["react"], "^18.3.1");
    }

    #[test]
    fn test_plan_workspace_protocol_rewrite() {
        let temp = TempDir::new().unwrap();
        let repos = two_apps(temp.path());
        let options = PlanOptions {
            workspace_protocol: true,
            ..PlanOptions::default()
        };
        let plan = build(&repos, &options);

        let rewritten = plan
            .files
            .iter()
            .find(|f| f.relative_path == "packages/api/package.json")
            .unwrap();
        let manifest: Value = serde_json::from_str(&rewritten.content).unwrap();
        assert_eq!(manifest["dependencies"]["@acme/web"], "workspace:*");
        assert_eq!(manifest["dependencies"]["react"], "^18.3.1");
        assert!(plan.files.iter().all(|f| f.relative_path != "packages/web/package.json"));
    }

    #[test]
    fn test_plan_collision_strategies() {
        let temp = TempDir::new().unwrap();
        let repos = two_apps(temp.path());
        for repo in &repos {
            fs::write(repo.path.join(".gitignore"), format!("{}-dist\n", repo.name)).unwrap();
            fs::write(repo.path.join("README.md"), format!("# {}\n", repo.name)).unwrap();
            fs::write(repo.path.join("LICENSE"), format!("{} license\n", repo.name)).unwrap();
        }
        let mut options = PlanOptions::default();
        options
            .collisions
            .insert("LICENSE".to_string(), CollisionStrategy::KeepLast);
        let plan = build(&repos, &options);

        let file = |path: &str| {
            plan.files
                .iter()
                .find(|f| f.relative_path == path)
                .map(|f| f.content.clone())
        };
        assert_eq!(file(".gitignore").unwrap(), "web-dist\n\napi-dist\n");
        assert_eq!(file("README.web.md").unwrap(), "# web\n");
        assert_eq!(file("README.api.md").unwrap(), "# api\n");
        assert_eq!(file("LICENSE").unwrap(), "api license\n");
    }

    #[test]
    fn test_destination_names_fall_back_and_dedupe() {
        let temp = TempDir::new().unwrap();
        let repos = vec![
            repo(temp.path(), "one", r#"{"name": "@a/ui", "version": "1.0.0"}"#),
            repo(temp.path(), "two", r#"{"name": "@b/ui", "version": "1.0.0"}"#),
            repo(temp.path(), "three", r#"{"version": "1.0.0"}"#),
        ];
        let report = analyze::execute(&repos, &NullSink).unwrap();
        let names = destination_names(&repos, &report);
        assert_eq!(names, vec!["ui", "ui-2", "three"]);
    }

    #[test]
    fn test_plan_embeds_findings() {
        let temp = TempDir::new().unwrap();
        let repos = two_apps(temp.path());
        let plan = build(&repos, &PlanOptions::default());
        let findings = plan.analysis_findings.as_ref().unwrap();
        assert_eq!(findings.report.conflicts.declared.len(), 1);
        assert_eq!(findings.package_dirs.get("web").map(String::as_str), Some("web"));

        let json = plan.to_json().unwrap();
        assert!(json.contains("\"declaredConflicts\""));
        assert!(json.contains("\"complexityScore\""));
        let reparsed = crate::plan::parse_plan(&json).unwrap();
        assert_eq!(reparsed, plan);
    }
}
