//! # Conflict Detection
//!
//! Finds every dependency that the repositories being merged disagree on.
//!
//! Three independent categories are produced and never folded into each
//! other, because each one is fixed differently:
//!
//! - **Declared** conflicts: manifests ask for different specifier strings.
//! - **Resolved** conflicts: lockfiles actually installed different versions.
//!   Reported even when a declared conflict exists for the same name.
//! - **Peer** conflicts: a package's `peerDependencies` range is not
//!   satisfied by a version available in the merge set.
//!
//! On top of those, `decisions` lists what a human must decide (incompatible
//! majors, peer violations) and `warnings` lists specifiers that are not
//! plain semver, for visibility only.
//!
//! Detection is a pure function of its inputs and sorts everything it
//! returns, so running it twice yields identical reports.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::lockfile::ResolvedVersions;
use crate::manifest::{DependencyType, PackageDescriptor};
use crate::specifier::{self, ReferenceKind, SpecifierKind, VersionSpecifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Incompatible,
}

impl Severity {
    /// Weight used by the complexity score.
    pub fn points(&self) -> u32 {
        match self {
            Severity::Minor => 1,
            Severity::Major => 5,
            Severity::Incompatible => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictSource {
    Declared,
    Resolved,
    PeerConstraint,
}

/// One place a dependency is requested or resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionUse {
    pub specifier: String,
    pub repo: String,
    pub package: String,
    pub dep_type: DependencyType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub name: String,
    pub versions: Vec<VersionUse>,
    pub severity: Severity,
    pub confidence: Confidence,
    pub source: ConflictSource,
}

impl ConflictRecord {
    /// Distinct specifier strings involved, sorted.
    pub fn specifiers(&self) -> BTreeSet<&str> {
        self.versions.iter().map(|v| v.specifier.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionKind {
    IncompatibleVersions,
    PeerViolation,
}

/// Something the operator has to decide before the merge is sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub name: String,
    pub kind: DecisionKind,
    pub description: String,
    pub suggested_action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningKind {
    Git,
    File,
    Link,
    Url,
    Alias,
    Workspace,
    Wildcard,
    Unparsed,
}

impl WarningKind {
    fn of(spec: &VersionSpecifier) -> Option<Self> {
        match spec.kind {
            SpecifierKind::Semver => None,
            SpecifierKind::Wildcard => Some(WarningKind::Wildcard),
            SpecifierKind::Unparsed => Some(WarningKind::Unparsed),
            SpecifierKind::Reference(reference) => Some(match reference {
                ReferenceKind::Git => WarningKind::Git,
                ReferenceKind::File => WarningKind::File,
                ReferenceKind::Link => WarningKind::Link,
                ReferenceKind::Url => WarningKind::Url,
                ReferenceKind::Alias => WarningKind::Alias,
                ReferenceKind::Workspace => WarningKind::Workspace,
            }),
        }
    }
}

/// A specifier that is not plain semver. Not a conflict.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecifierWarning {
    pub name: String,
    pub specifier: String,
    pub repo: String,
    pub package: String,
    pub kind: WarningKind,
}

/// Everything conflict detection found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    #[serde(rename = "declaredConflicts")]
    pub declared: Vec<ConflictRecord>,
    #[serde(rename = "resolvedConflicts")]
    pub resolved: Vec<ConflictRecord>,
    #[serde(rename = "peerConflicts")]
    pub peer: Vec<ConflictRecord>,
    pub decisions: Vec<Decision>,
    pub warnings: Vec<SpecifierWarning>,
}

impl ConflictReport {
    /// One record per dependency name, resolved taking precedence over
    /// declared, followed by every peer record as its own entry.
    pub fn merged_view(&self) -> Vec<&ConflictRecord> {
        let mut by_name: BTreeMap<&str, &ConflictRecord> = BTreeMap::new();
        for record in &self.declared {
            by_name.insert(&record.name, record);
        }
        for record in &self.resolved {
            by_name.insert(&record.name, record);
        }
        let mut merged: Vec<&ConflictRecord> = by_name.into_values().collect();
        merged.extend(self.peer.iter());
        merged
    }

    /// Whether `name` has a declared or resolved conflict.
    pub fn has_conflict(&self, name: &str) -> bool {
        self.declared.iter().chain(&self.resolved).any(|r| r.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty() && self.resolved.is_empty() && self.peer.is_empty()
    }
}

/// Severity of a set of specifiers that disagree.
///
/// Fewer than two parseable versions is always `Major`: mixing semver with
/// references is ambiguous and is never downgraded.
pub fn severity_of(specs: &[VersionSpecifier]) -> Severity {
    let parsed: Vec<_> = specs.iter().filter_map(|s| s.parsed.as_ref()).collect();
    if parsed.len() < 2 {
        return Severity::Major;
    }
    let majors: BTreeSet<u64> = parsed.iter().map(|v| v.major).collect();
    if majors.len() > 1 {
        return Severity::Incompatible;
    }
    let minors: BTreeSet<u64> = parsed.iter().map(|v| v.minor).collect();
    if minors.len() > 1 {
        return Severity::Major;
    }
    Severity::Minor
}

/// How much to trust the severity of a set of specifiers.
pub fn confidence_of(specs: &[VersionSpecifier]) -> Confidence {
    if specs.iter().all(VersionSpecifier::is_semver) {
        Confidence::High
    } else if specs.iter().any(|s| matches!(s.kind, SpecifierKind::Reference(_))) {
        Confidence::Low
    } else {
        Confidence::Medium
    }
}

fn build_record(name: &str, mut versions: Vec<VersionUse>, source: ConflictSource) -> ConflictRecord {
    versions.sort();
    versions.dedup();
    let specs: Vec<VersionSpecifier> = versions
        .iter()
        .map(|v| v.specifier.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(specifier::classify)
        .collect();
    ConflictRecord {
        name: name.to_string(),
        severity: severity_of(&specs),
        confidence: confidence_of(&specs),
        versions,
        source,
    }
}

/// Run conflict detection over every package in the merge set.
///
/// `resolved` maps a repo id to the versions its lockfile resolved.
pub fn detect(
    packages: &[PackageDescriptor],
    resolved: &BTreeMap<String, ResolvedVersions>,
) -> ConflictReport {
    let declared = declared_conflicts(packages);
    let resolved_records = resolved_conflicts(packages, resolved);
    let peer = peer_conflicts(packages, resolved);

    let mut decisions: Vec<Decision> = declared
        .iter()
        .filter(|r| r.severity == Severity::Incompatible)
        .map(incompatible_decision)
        .collect();
    decisions.extend(peer.iter().map(peer_decision));

    ConflictReport {
        declared,
        resolved: resolved_records,
        peer,
        decisions,
        warnings: specifier_warnings(packages),
    }
}

fn declared_conflicts(packages: &[PackageDescriptor]) -> Vec<ConflictRecord> {
    let mut uses: BTreeMap<&str, Vec<VersionUse>> = BTreeMap::new();
    for package in packages {
        for dep_type in [DependencyType::Runtime, DependencyType::Dev] {
            for (name, spec) in package.deps(dep_type) {
                uses.entry(name).or_default().push(VersionUse {
                    specifier: spec.clone(),
                    repo: package.repo.clone(),
                    package: package.name.clone(),
                    dep_type,
                });
            }
        }
    }

    uses.into_iter()
        .filter(|(_, versions)| {
            versions
                .iter()
                .map(|v| v.specifier.as_str())
                .collect::<BTreeSet<_>>()
                .len()
                > 1
        })
        .map(|(name, versions)| build_record(name, versions, ConflictSource::Declared))
        .collect()
}

fn resolved_conflicts(
    packages: &[PackageDescriptor],
    resolved: &BTreeMap<String, ResolvedVersions>,
) -> Vec<ConflictRecord> {
    let mut uses: BTreeMap<&str, Vec<VersionUse>> = BTreeMap::new();
    for package in packages {
        let Some(versions) = resolved.get(&package.repo) else {
            continue;
        };
        // Lockfiles also list hoisted transitive packages; only direct
        // dependencies of the package take part.
        for (name, version) in versions {
            let Some((dep_type, _)) = package.declared(name) else {
                continue;
            };
            uses.entry(name).or_default().push(VersionUse {
                specifier: version.clone(),
                repo: package.repo.clone(),
                package: package.name.clone(),
                dep_type,
            });
        }
    }

    uses.into_iter()
        .filter(|(_, versions)| {
            versions
                .iter()
                .map(|v| v.specifier.as_str())
                .collect::<BTreeSet<_>>()
                .len()
                > 1
        })
        .map(|(name, versions)| build_record(name, versions, ConflictSource::Resolved))
        .collect()
}

/// A version of some dependency that is available somewhere in the merge set.
struct Available {
    version: semver::Version,
    from_lockfile: bool,
    usage: VersionUse,
}

fn available_versions(
    name: &str,
    packages: &[PackageDescriptor],
    resolved: &BTreeMap<String, ResolvedVersions>,
) -> Vec<Available> {
    let mut available = Vec::new();
    for package in packages {
        if package.name == name
            && let Some(version) = specifier::lower_bound(&package.version)
        {
            available.push(Available {
                version,
                from_lockfile: false,
                usage: VersionUse {
                    specifier: package.version.clone(),
                    repo: package.repo.clone(),
                    package: package.name.clone(),
                    dep_type: DependencyType::Runtime,
                },
            });
        }

        let locked = resolved.get(&package.repo).and_then(|r| r.get(name));
        for dep_type in [DependencyType::Runtime, DependencyType::Dev] {
            let Some(declared) = package.deps(dep_type).get(name) else {
                continue;
            };
            let (raw, from_lockfile) = match locked {
                Some(version) => (version.as_str(), true),
                None => (declared.as_str(), false),
            };
            let spec = specifier::classify(raw);
            let Some(version) = spec.parsed else {
                continue;
            };
            available.push(Available {
                version,
                from_lockfile,
                usage: VersionUse {
                    specifier: raw.to_string(),
                    repo: package.repo.clone(),
                    package: package.name.clone(),
                    dep_type,
                },
            });
        }
    }
    available
}

fn peer_conflicts(
    packages: &[PackageDescriptor],
    resolved: &BTreeMap<String, ResolvedVersions>,
) -> Vec<ConflictRecord> {
    let mut records = Vec::new();
    for package in packages {
        for (name, range) in &package.peer_dependencies {
            let violations: Vec<Available> = available_versions(name, packages, resolved)
                .into_iter()
                .filter(|a| specifier::satisfies(range, &a.version) == Some(false))
                .collect();
            if violations.is_empty() {
                continue;
            }

            let all_locked = violations.iter().all(|a| a.from_lockfile);
            let mut versions = vec![VersionUse {
                specifier: range.clone(),
                repo: package.repo.clone(),
                package: package.name.clone(),
                dep_type: DependencyType::Peer,
            }];
            versions.extend(violations.into_iter().map(|a| a.usage));

            let mut record = build_record(name, versions, ConflictSource::PeerConstraint);
            // A mismatch of any kind against a peer range is at least major.
            record.severity = record.severity.max(Severity::Major);
            record.confidence = if all_locked {
                Confidence::High
            } else {
                record.confidence.max(Confidence::Medium)
            };
            records.push(record);
        }
    }
    records.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| peer_owner(a).cmp(peer_owner(b)))
    });
    records
}

/// The package whose `peerDependencies` produced a peer record.
fn peer_owner(record: &ConflictRecord) -> &str {
    record
        .versions
        .iter()
        .find(|v| v.dep_type == DependencyType::Peer)
        .map(|v| v.package.as_str())
        .unwrap_or_default()
}

fn incompatible_decision(record: &ConflictRecord) -> Decision {
    let requested: Vec<String> = record
        .versions
        .iter()
        .map(|v| format!("{} ({})", v.specifier, v.package))
        .collect();
    Decision {
        name: record.name.clone(),
        kind: DecisionKind::IncompatibleVersions,
        description: format!(
            "{} is requested with incompatible major versions: {}",
            record.name,
            requested.join(", ")
        ),
        suggested_action: format!(
            "Upgrade every package to one major version of {}, or use the isolate strategy",
            record.name
        ),
    }
}

fn peer_decision(record: &ConflictRecord) -> Decision {
    let range = record
        .versions
        .iter()
        .find(|v| v.dep_type == DependencyType::Peer)
        .map(|v| v.specifier.as_str())
        .unwrap_or_default();
    let offending: Vec<String> = record
        .versions
        .iter()
        .filter(|v| v.dep_type != DependencyType::Peer)
        .map(|v| format!("{} ({})", v.specifier, v.package))
        .collect();
    Decision {
        name: record.name.clone(),
        kind: DecisionKind::PeerViolation,
        description: format!(
            "{} requires peer {}@{} but the merge set provides {}",
            peer_owner(record),
            record.name,
            range,
            offending.join(", ")
        ),
        suggested_action: format!(
            "Widen the peer range of {} in {} or align the provided versions",
            record.name,
            peer_owner(record)
        ),
    }
}

fn specifier_warnings(packages: &[PackageDescriptor]) -> Vec<SpecifierWarning> {
    let mut warnings: Vec<SpecifierWarning> = packages
        .iter()
        .flat_map(|package| {
            package.all_dependencies().filter_map(|(_, name, spec)| {
                let kind = WarningKind::of(&specifier::classify(spec))?;
                Some(SpecifierWarning {
                    name: name.clone(),
                    specifier: spec.clone(),
                    repo: package.repo.clone(),
                    package: package.name.clone(),
                    kind,
                })
            })
        })
        .collect();
    warnings.sort();
    warnings.dedup();
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn package(name: &str, deps: &[(&str, &str)]) -> PackageDescriptor {
        PackageDescriptor {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            dependencies: deps
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
            dev_dependencies: BTreeMap::new(),
            peer_dependencies: BTreeMap::new(),
            scripts: BTreeMap::new(),
            repo: name.to_string(),
            path: PathBuf::from(format!("/tmp/{}", name)),
        }
    }

    #[test]
    fn test_severity_of() {
        let sev = |specs: &[&str]| {
            severity_of(&specs.iter().map(|s| specifier::classify(s)).collect::<Vec<_>>())
        };
        assert_eq!(sev(&["^4.17.15", "^4.17.21"]), Severity::Minor);
        assert_eq!(sev(&["^4.1.0", "^4.2.0"]), Severity::Major);
        assert_eq!(sev(&["^17.0.2", "^18.2.0"]), Severity::Incompatible);
        assert_eq!(sev(&["^1.0.0", "github:foo/bar"]), Severity::Major);
        assert_eq!(sev(&["*", "latest"]), Severity::Major);
    }

    #[test]
    fn test_confidence_of() {
        let conf = |specs: &[&str]| {
            confidence_of(&specs.iter().map(|s| specifier::classify(s)).collect::<Vec<_>>())
        };
        assert_eq!(conf(&["^1.0.0", "~1.2.0"]), Confidence::High);
        assert_eq!(conf(&["^1.0.0", "1.x"]), Confidence::Medium);
        assert_eq!(conf(&["^1.0.0", "file:../lib"]), Confidence::Low);
    }

    #[test]
    fn test_declared_minor_conflict() {
        let packages = vec![
            package("a", &[("lodash", "^4.17.15")]),
            package("b", &[("lodash", "^4.17.21")]),
        ];
        let report = detect(&packages, &BTreeMap::new());
        assert_eq!(report.declared.len(), 1);
        let record = &report.declared[0];
        assert_eq!(record.name, "lodash");
        assert_eq!(record.severity, Severity::Minor);
        assert_eq!(record.confidence, Confidence::High);
        assert_eq!(record.source, ConflictSource::Declared);
        assert_eq!(record.versions.len(), 2);
        assert!(report.decisions.is_empty());
    }

    #[test]
    fn test_declared_incompatible_conflict_produces_decision() {
        let packages = vec![
            package("a", &[("react", "^17.0.2")]),
            package("b", &[("react", "^18.2.0")]),
        ];
        let report = detect(&packages, &BTreeMap::new());
        assert_eq!(report.declared.len(), 1);
        assert_eq!(report.declared[0].severity, Severity::Incompatible);
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].kind, DecisionKind::IncompatibleVersions);
        assert!(report.decisions[0].description.contains("^17.0.2 (a)"));
    }

    #[test]
    fn test_identical_specifiers_are_not_conflicts() {
        let packages = vec![
            package("a", &[("lodash", "^4.17.21")]),
            package("b", &[("lodash", "^4.17.21")]),
        ];
        let report = detect(&packages, &BTreeMap::new());
        assert!(report.is_empty());
    }

    #[test]
    fn test_mixed_reference_is_major_low_confidence() {
        let packages = vec![
            package("a", &[("utils", "^1.0.0")]),
            package("b", &[("utils", "git+https://example.com/utils.git")]),
        ];
        let report = detect(&packages, &BTreeMap::new());
        assert_eq!(report.declared[0].severity, Severity::Major);
        assert_eq!(report.declared[0].confidence, Confidence::Low);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::Git);
        assert_eq!(report.warnings[0].package, "b");
    }

    #[test]
    fn test_resolved_conflict_reported_alongside_declared() {
        let packages = vec![
            package("a", &[("lodash", "^4.17.15")]),
            package("b", &[("lodash", "^4.17.21")]),
        ];
        let mut resolved = BTreeMap::new();
        resolved.insert(
            "a".to_string(),
            ResolvedVersions::from([
                ("lodash".to_string(), "4.17.15".to_string()),
                ("transitive".to_string(), "1.0.0".to_string()),
            ]),
        );
        resolved.insert(
            "b".to_string(),
            ResolvedVersions::from([
                ("lodash".to_string(), "4.17.21".to_string()),
                ("transitive".to_string(), "2.0.0".to_string()),
            ]),
        );

        let report = detect(&packages, &resolved);
        assert_eq!(report.declared.len(), 1);
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].source, ConflictSource::Resolved);
        assert_eq!(report.resolved[0].name, "lodash");

        let merged = report.merged_view();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, ConflictSource::Resolved);
    }

    #[test]
    fn test_peer_violation_kept_distinct() {
        let mut plugin = package("plugin", &[]);
        plugin
            .peer_dependencies
            .insert("react".to_string(), "^17.0.0".to_string());
        let packages = vec![
            plugin,
            package("web", &[("react", "^18.2.0")]),
            package("admin", &[("react", "^18.2.0")]),
        ];

        let report = detect(&packages, &BTreeMap::new());
        assert!(report.declared.is_empty());
        assert_eq!(report.peer.len(), 1);
        let record = &report.peer[0];
        assert_eq!(record.source, ConflictSource::PeerConstraint);
        assert_eq!(record.versions.len(), 3);
        assert!(record.severity >= Severity::Major);
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].kind, DecisionKind::PeerViolation);
        assert!(report.decisions[0].description.contains("plugin requires peer react@^17.0.0"));

        // Peer records are appended, never merged by name.
        assert_eq!(report.merged_view().len(), 1);
    }

    #[test]
    fn test_peer_satisfied_by_internal_package() {
        let mut plugin = package("plugin", &[]);
        plugin
            .peer_dependencies
            .insert("core".to_string(), "^1.0.0".to_string());
        let packages = vec![plugin, package("core", &[])];
        let report = detect(&packages, &BTreeMap::new());
        assert!(report.peer.is_empty());
    }

    #[test]
    fn test_detection_is_idempotent() {
        let packages = vec![
            package("b", &[("react", "^18.2.0"), ("lodash", "^4.17.21")]),
            package("a", &[("react", "^17.0.2"), ("lodash", "^4.17.15")]),
            package("c", &[("lodash", "latest")]),
        ];
        let first = detect(&packages, &BTreeMap::new());
        let second = detect(&packages, &BTreeMap::new());
        assert_eq!(first, second);
        let names: Vec<_> = first.declared.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["lodash", "react"]);
    }
}
