//! # Phase 1: Analysis
//!
//! Scans every acquired repository and produces an [`AnalysisReport`]. This
//! phase only reads; nothing under the repositories is modified.

use std::collections::BTreeMap;

use log::Level;
use serde::{Deserialize, Serialize};

use super::{EventSink, emit_log};
use crate::collisions::{self, FileCollision};
use crate::conflicts::{self, ConflictReport};
use crate::error::Result;
use crate::graph::{self, ComplexityInputs, CrossDependencyEdge, CycleRecord, Hotspot};
use crate::lockfile::{self, ResolvedVersions};
use crate::manifest::PackageDescriptor;
use crate::package_manager::PackageManager;
use crate::repository::AcquiredRepo;

/// Everything the analysis found about a merge set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// One descriptor per repository, in source order.
    pub packages: Vec<PackageDescriptor>,
    /// Package manager detected from each repository's lockfile.
    #[serde(default)]
    pub package_managers: BTreeMap<String, PackageManager>,
    #[serde(flatten)]
    pub conflicts: ConflictReport,
    pub cross_dependencies: Vec<CrossDependencyEdge>,
    pub cycles: Vec<CycleRecord>,
    pub hotspots: Vec<Hotspot>,
    pub collisions: Vec<FileCollision>,
    pub complexity_score: u8,
}

impl AnalysisReport {
    /// The package scanned from repository `repo`.
    pub fn package_for(&self, repo: &str) -> Option<&PackageDescriptor> {
        self.packages.iter().find(|p| p.repo == repo)
    }
}

/// Analyze `repos`.
///
/// A repository without a readable `package.json` fails the analysis. A
/// lockfile that cannot be parsed only loses its resolved versions.
pub fn execute(repos: &[AcquiredRepo], sink: &dyn EventSink) -> Result<AnalysisReport> {
    let mut packages = Vec::with_capacity(repos.len());
    let mut package_managers = BTreeMap::new();
    let mut resolved: BTreeMap<String, ResolvedVersions> = BTreeMap::new();

    for repo in repos {
        let package = PackageDescriptor::scan(&repo.name, &repo.path)?;
        emit_log(
            sink,
            Level::Info,
            format!("Scanned {} ({}@{})", repo.name, package.name, package.version),
        );

        if let Some(pm) = lockfile::detect_package_manager(&repo.path) {
            package_managers.insert(repo.name.clone(), pm);
        }
        match lockfile::read_resolved(&repo.path, &package) {
            Ok(Some(versions)) => {
                resolved.insert(repo.name.clone(), versions);
            }
            Ok(None) => {
                emit_log(
                    sink,
                    Level::Debug,
                    format!("{} has no lockfile; using declared ranges", repo.name),
                );
            }
            Err(e) => {
                emit_log(
                    sink,
                    Level::Warn,
                    format!("Ignoring unreadable lockfile in {}: {}", repo.name, e),
                );
            }
        }
        packages.push(package);
    }

    let conflicts = conflicts::detect(&packages, &resolved);
    let cross_dependencies = graph::cross_edges(&packages);
    let cycles = graph::find_cycles(&cross_dependencies);
    let hotspots = graph::hotspots(&packages, &conflicts);
    let collisions = collisions::detect(repos)?;

    let inputs = ComplexityInputs::gather(
        packages.len(),
        &conflicts,
        cycles.len(),
        collisions.len(),
        cross_dependencies.len(),
    );
    let complexity_score = graph::complexity_score(&inputs);

    emit_log(
        sink,
        Level::Info,
        format!(
            "Found {} declared, {} resolved and {} peer conflicts, {} cycles, {} file collisions (complexity {})",
            conflicts.declared.len(),
            conflicts.resolved.len(),
            conflicts.peer.len(),
            cycles.len(),
            collisions.len(),
            complexity_score
        ),
    );

    Ok(AnalysisReport {
        packages,
        package_managers,
        conflicts,
        cross_dependencies,
        cycles,
        hotspots,
        collisions,
        complexity_score,
    })
}
