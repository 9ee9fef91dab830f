//! # Dependency Graph
//!
//! Analysis of how the packages being merged depend on each other and on
//! shared third-party dependencies.
//!
//! - [`cross_edges`]: dependencies between two packages of the merge set.
//! - [`find_cycles`]: every elementary cycle among those edges.
//! - [`hotspots`]: third-party dependencies requested by several packages.
//! - [`complexity_score`]: an advisory 0–100 number summarising how hard the
//!   merge is likely to be. Nothing in the pipeline branches on it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::conflicts::{ConflictReport, ConflictSource, Severity};
use crate::manifest::{DependencyType, PackageDescriptor};

/// A dependency from one package of the merge set on another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDependencyEdge {
    pub from: String,
    pub to: String,
    pub specifier: String,
    pub dep_type: DependencyType,
}

/// An elementary cycle. `edge_types[i]` is the type of the hop from
/// `nodes[i]` to `nodes[(i + 1) % len]`.
///
/// The starting node is an artifact of traversal order; compare cycles by
/// their edge sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub nodes: Vec<String>,
    pub edge_types: Vec<DependencyType>,
}

impl CycleRecord {
    /// The `(from, to)` pairs making up the cycle.
    pub fn edge_set(&self) -> BTreeSet<(String, String)> {
        let len = self.nodes.len();
        (0..len)
            .map(|i| (self.nodes[i].clone(), self.nodes[(i + 1) % len].clone()))
            .collect()
    }
}

/// A dependency shared by more than one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub name: String,
    pub dependents: usize,
    pub has_conflict: bool,
    pub ranges: BTreeSet<String>,
}

/// Edges between packages that are both part of the merge set.
pub fn cross_edges(packages: &[PackageDescriptor]) -> Vec<CrossDependencyEdge> {
    let internal: BTreeSet<&str> = packages.iter().map(|p| p.name.as_str()).collect();

    let mut edges: Vec<CrossDependencyEdge> = packages
        .iter()
        .flat_map(|package| {
            let internal = &internal;
            package
                .all_dependencies()
                .filter(move |(_, name, _)| {
                    name.as_str() != package.name && internal.contains(name.as_str())
                })
                .map(move |(dep_type, name, spec)| CrossDependencyEdge {
                    from: package.name.clone(),
                    to: name.clone(),
                    specifier: spec.clone(),
                    dep_type,
                })
        })
        .collect();
    edges.sort();
    edges.dedup();
    edges
}

/// Every elementary cycle over `edges`, each reported once.
///
/// Nodes are indexed in sorted order. For each start index `s` a DFS walks
/// only through nodes with a higher index and records a cycle whenever an
/// edge leads back to `s`, so a cycle is found exactly once: from its
/// lowest-indexed node.
pub fn find_cycles(edges: &[CrossDependencyEdge]) -> Vec<CycleRecord> {
    let nodes: Vec<&str> = edges
        .iter()
        .flat_map(|e| [e.from.as_str(), e.to.as_str()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index: BTreeMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    // One hop per ordered pair; parallel edges of several types would
    // otherwise report the same node cycle more than once.
    let mut adjacency: Vec<BTreeMap<usize, DependencyType>> = vec![BTreeMap::new(); nodes.len()];
    for edge in edges {
        let (from, to) = (index[edge.from.as_str()], index[edge.to.as_str()]);
        if from == to {
            continue;
        }
        let hop = adjacency[from].entry(to).or_insert(edge.dep_type);
        *hop = (*hop).min(edge.dep_type);
    }

    let mut search = CycleSearch {
        adjacency: &adjacency,
        path: Vec::new(),
        hops: Vec::new(),
        on_path: vec![false; nodes.len()],
        found: Vec::new(),
    };
    for start in 0..nodes.len() {
        search.path.push(start);
        search.on_path[start] = true;
        search.walk(start, start);
        search.on_path[start] = false;
        search.path.pop();
    }

    search
        .found
        .into_iter()
        .map(|(path, hops)| CycleRecord {
            nodes: path.into_iter().map(|i| nodes[i].to_string()).collect(),
            edge_types: hops,
        })
        .collect()
}

struct CycleSearch<'a> {
    adjacency: &'a [BTreeMap<usize, DependencyType>],
    path: Vec<usize>,
    hops: Vec<DependencyType>,
    on_path: Vec<bool>,
    found: Vec<(Vec<usize>, Vec<DependencyType>)>,
}

impl CycleSearch<'_> {
    fn walk(&mut self, start: usize, node: usize) {
        for (&next, &dep_type) in self.adjacency[node].iter() {
            if next == start {
                let mut hops = self.hops.clone();
                hops.push(dep_type);
                self.found.push((self.path.clone(), hops));
            } else if next > start && !self.on_path[next] {
                self.path.push(next);
                self.hops.push(dep_type);
                self.on_path[next] = true;
                self.walk(start, next);
                self.on_path[next] = false;
                self.hops.pop();
                self.path.pop();
            }
        }
    }
}

/// Dependencies referenced by more than one package, most shared first.
pub fn hotspots(packages: &[PackageDescriptor], report: &ConflictReport) -> Vec<Hotspot> {
    let mut usage: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<String>)> = BTreeMap::new();
    for package in packages {
        for (_, name, spec) in package.all_dependencies() {
            let (dependents, ranges) = usage.entry(name.as_str()).or_default();
            dependents.insert(package.name.as_str());
            ranges.insert(spec.clone());
        }
    }

    let peer_names: BTreeSet<&str> = report.peer.iter().map(|r| r.name.as_str()).collect();
    let mut hotspots: Vec<Hotspot> = usage
        .into_iter()
        .filter(|(_, (dependents, _))| dependents.len() > 1)
        .map(|(name, (dependents, ranges))| Hotspot {
            name: name.to_string(),
            dependents: dependents.len(),
            has_conflict: report.has_conflict(name) || peer_names.contains(name),
            ranges,
        })
        .collect();
    hotspots.sort_by(|a, b| b.dependents.cmp(&a.dependents).then_with(|| a.name.cmp(&b.name)));
    hotspots
}

/// Counts feeding [`complexity_score`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplexityInputs {
    pub packages: usize,
    pub incompatible: usize,
    pub major: usize,
    pub minor: usize,
    pub peer_conflicts: usize,
    pub cycles: usize,
    pub collisions: usize,
    pub cross_edges: usize,
}

impl ComplexityInputs {
    /// Gather the counts from an analysis. Declared and resolved conflicts
    /// for the same name are counted once, resolved first.
    pub fn gather(
        packages: usize,
        report: &ConflictReport,
        cycles: usize,
        collisions: usize,
        cross_edges: usize,
    ) -> Self {
        let mut inputs = Self {
            packages,
            peer_conflicts: report.peer.len(),
            cycles,
            collisions,
            cross_edges,
            ..Self::default()
        };
        for record in report.merged_view() {
            if record.source == ConflictSource::PeerConstraint {
                continue;
            }
            match record.severity {
                Severity::Incompatible => inputs.incompatible += 1,
                Severity::Major => inputs.major += 1,
                Severity::Minor => inputs.minor += 1,
            }
        }
        inputs
    }
}

/// Advisory merge complexity in `0..=100`.
pub fn complexity_score(inputs: &ComplexityInputs) -> u8 {
    let size = inputs.packages.min(20) as i64;
    let severity = (inputs.incompatible * Severity::Incompatible.points() as usize
        + inputs.major * Severity::Major.points() as usize
        + inputs.minor * Severity::Minor.points() as usize)
        .min(60) as i64;
    let peers = 5 * inputs.peer_conflicts as i64;
    let cycles = 10 * inputs.cycles as i64;
    let collisions = inputs.collisions.min(20) as i64;

    let density = if inputs.cross_edges > 2 * inputs.packages {
        10
    } else if inputs.cross_edges > 0 && inputs.cross_edges <= inputs.packages {
        -5
    } else {
        0
    };

    (size + severity + peers + cycles + collisions + density).clamp(0, 100) as u8
}
