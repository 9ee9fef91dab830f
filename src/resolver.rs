//! # Conflict Resolution
//!
//! Turns declared conflicts into one winning specifier per dependency, using
//! one of four strategies:
//!
//! - `highest` / `lowest`: pick by the specifier order from
//!   [`crate::specifier::compare`], among parseable specifiers only.
//! - `isolate`: pick nothing. Every package keeps its own versions and the
//!   root manifest gets no dependency block.
//! - `hoist-with-overrides`: pick the highest and additionally force every
//!   consumer onto it through the package manager's override field.
//!
//! Runtime and dev winners are chosen independently. Ties are broken by the
//! lexically smallest package name, then the raw specifier, so the result
//! never depends on the order conflicts were discovered in.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conflicts::{ConflictRecord, VersionUse};
use crate::error::{Error, Result};
use crate::manifest::DependencyType;
use crate::merge::json::navigate_object;
use crate::package_manager::PackageManager;
use crate::specifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Highest,
    Lowest,
    Isolate,
    HoistWithOverrides,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Highest,
        Strategy::Lowest,
        Strategy::Isolate,
        Strategy::HoistWithOverrides,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Highest => "highest",
            Strategy::Lowest => "lowest",
            Strategy::Isolate => "isolate",
            Strategy::HoistWithOverrides => "hoist-with-overrides",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| Error::ConfigParse {
                message: format!("Unknown strategy '{}'", s),
                hint: Some(
                    "Use one of: highest, lowest, isolate, hoist-with-overrides".to_string(),
                ),
            })
    }
}

/// Winning specifiers per dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub strategy: Strategy,
    pub runtime: BTreeMap<String, String>,
    pub dev: BTreeMap<String, String>,
    pub overrides: BTreeMap<String, String>,
    /// Whether winners may be written to the root manifest.
    pub hoist: bool,
}

impl Resolution {
    /// Write the override map into `root` under the field `pm` reads.
    ///
    /// Does nothing when there are no overrides.
    pub fn write_overrides(&self, root: &mut Value, pm: PackageManager) -> Result<()> {
        if self.overrides.is_empty() {
            return Ok(());
        }
        let Some((last, parents)) = pm.override_field().split_last() else {
            return Ok(());
        };
        let overrides: Map<String, Value> = self
            .overrides
            .iter()
            .map(|(name, version)| (name.clone(), Value::String(version.clone())))
            .collect();
        navigate_object(root, parents)?.insert(last.to_string(), Value::Object(overrides));
        Ok(())
    }
}

/// Resolve declared conflicts with `strategy`.
pub fn resolve(conflicts: &[ConflictRecord], strategy: Strategy) -> Resolution {
    let mut resolution = Resolution {
        strategy,
        hoist: strategy != Strategy::Isolate,
        ..Resolution::default()
    };
    if strategy == Strategy::Isolate {
        return resolution;
    }

    let highest = strategy != Strategy::Lowest;
    for record in conflicts {
        for (dep_type, winners) in [
            (DependencyType::Runtime, &mut resolution.runtime),
            (DependencyType::Dev, &mut resolution.dev),
        ] {
            let candidates: Vec<&VersionUse> = record
                .versions
                .iter()
                .filter(|v| v.dep_type == dep_type)
                .collect();
            if let Some(winner) = select(&candidates, highest) {
                winners.insert(record.name.clone(), winner.specifier.clone());
            }
        }

        if strategy == Strategy::HoistWithOverrides {
            let all: Vec<&VersionUse> = record
                .versions
                .iter()
                .filter(|v| v.dep_type != DependencyType::Peer)
                .collect();
            if let Some(winner) = select(&all, true) {
                resolution
                    .overrides
                    .insert(record.name.clone(), winner.specifier.clone());
            }
        }
    }
    resolution
}

/// Pick the highest (or lowest) candidate; `None` when there are none.
///
/// Only parseable specifiers compete. Git, file and wildcard specifiers are
/// picked from only when no candidate parses, and that pick is logged.
pub fn select<'a>(candidates: &[&'a VersionUse], highest: bool) -> Option<&'a VersionUse> {
    let (parseable, unparseable): (Vec<&VersionUse>, Vec<&VersionUse>) = candidates
        .iter()
        .copied()
        .partition(|v| specifier::classify(&v.specifier).is_semver());
    let pool = if parseable.is_empty() {
        &unparseable
    } else {
        &parseable
    };

    let winner = pool
        .iter()
        .copied()
        .reduce(|best, next| if beats(next, best, highest) { next } else { best })?;
    if parseable.is_empty() {
        log::warn!(
            "No parseable version among {} candidates, falling back to '{}' from {}",
            candidates.len(),
            winner.specifier,
            winner.package
        );
    }
    Some(winner)
}

fn beats(challenger: &VersionUse, incumbent: &VersionUse, highest: bool) -> bool {
    let ordering = specifier::compare_raw(&challenger.specifier, &incumbent.specifier);
    let ordering = if highest { ordering } else { ordering.reverse() };
    match ordering {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            (&challenger.package, &challenger.specifier, &challenger.repo)
                < (&incumbent.package, &incumbent.specifier, &incumbent.repo)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::{Confidence, ConflictSource, Severity};
    use proptest::prelude::{
        Just, any, prop_assert, prop_assert_eq, prop_assert_ne, prop_oneof, proptest,
    };
    use proptest::strategy::Strategy as PropStrategy;

    fn usage(specifier: &str, package: &str, dep_type: DependencyType) -> VersionUse {
        VersionUse {
            specifier: specifier.to_string(),
            repo: package.to_string(),
            package: package.to_string(),
            dep_type,
        }
    }

    fn record(name: &str, versions: Vec<VersionUse>) -> ConflictRecord {
        ConflictRecord {
            name: name.to_string(),
            versions,
            severity: Severity::Minor,
            confidence: Confidence::High,
            source: ConflictSource::Declared,
        }
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("highest".parse::<Strategy>().unwrap(), Strategy::Highest);
        assert_eq!(
            "hoist-with-overrides".parse::<Strategy>().unwrap(),
            Strategy::HoistWithOverrides
        );
        let err = "newest".parse::<Strategy>().unwrap_err();
        assert!(err.to_string().contains("Unknown strategy 'newest'"));
    }

    #[test]
    fn test_highest_and_lowest() {
        let conflicts = vec![record(
            "lodash",
            vec![
                usage("^4.17.15", "a", DependencyType::Runtime),
                usage("^4.17.21", "b", DependencyType::Runtime),
            ],
        )];
        let highest = resolve(&conflicts, Strategy::Highest);
        assert_eq!(highest.runtime["lodash"], "^4.17.21");
        assert!(highest.dev.is_empty());
        assert!(highest.hoist);
        assert!(highest.overrides.is_empty());

        let lowest = resolve(&conflicts, Strategy::Lowest);
        assert_eq!(lowest.runtime["lodash"], "^4.17.15");
    }

    #[test]
    fn test_runtime_and_dev_resolved_independently() {
        let conflicts = vec![record(
            "typescript",
            vec![
                usage("^5.4.0", "a", DependencyType::Dev),
                usage("^5.2.0", "b", DependencyType::Dev),
                usage("^4.9.0", "c", DependencyType::Runtime),
            ],
        )];
        let resolution = resolve(&conflicts, Strategy::Highest);
        assert_eq!(resolution.runtime["typescript"], "^4.9.0");
        assert_eq!(resolution.dev["typescript"], "^5.4.0");
    }

    #[test]
    fn test_isolate_resolves_nothing() {
        let conflicts = vec![record(
            "react",
            vec![
                usage("^17.0.2", "a", DependencyType::Runtime),
                usage("^18.2.0", "b", DependencyType::Runtime),
            ],
        )];
        let resolution = resolve(&conflicts, Strategy::Isolate);
        assert!(!resolution.hoist);
        assert!(resolution.runtime.is_empty());
        assert!(resolution.dev.is_empty());
        assert!(resolution.overrides.is_empty());
    }

    #[test]
    fn test_hoist_with_overrides_per_package_manager() {
        let conflicts = vec![record(
            "react",
            vec![
                usage("^17.0.2", "a", DependencyType::Runtime),
                usage("^18.2.0", "b", DependencyType::Dev),
            ],
        )];
        let resolution = resolve(&conflicts, Strategy::HoistWithOverrides);
        assert_eq!(resolution.overrides["react"], "^18.2.0");

        let mut npm = serde_json::json!({"name": "root"});
        resolution.write_overrides(&mut npm, PackageManager::Npm).unwrap();
        assert_eq!(npm["overrides"]["react"], "^18.2.0");

        let mut yarn = serde_json::json!({});
        resolution.write_overrides(&mut yarn, PackageManager::Yarn).unwrap();
        assert_eq!(yarn["resolutions"]["react"], "^18.2.0");

        let mut pnpm = serde_json::json!({"pnpm": {"neverBuiltDependencies": []}});
        resolution.write_overrides(&mut pnpm, PackageManager::Pnpm).unwrap();
        assert_eq!(pnpm["pnpm"]["overrides"]["react"], "^18.2.0");
        assert!(pnpm["pnpm"]["neverBuiltDependencies"].is_array());
    }

    #[test]
    fn test_tie_broken_by_package_name() {
        // "^1.2.0" and "~1.2.0" share a lower bound.
        let a = usage("~1.2.0", "alpha", DependencyType::Runtime);
        let b = usage("^1.2.0", "beta", DependencyType::Runtime);
        assert_eq!(select(&[&a, &b], true).unwrap().package, "alpha");
        assert_eq!(select(&[&b, &a], true).unwrap().package, "alpha");
        assert_eq!(select(&[&b, &a], false).unwrap().package, "alpha");
    }

    #[test]
    fn test_unparseable_never_wins_highest() {
        let a = usage("github:acme/utils", "a", DependencyType::Runtime);
        let b = usage("^0.0.1", "b", DependencyType::Runtime);
        assert_eq!(select(&[&a, &b], true).unwrap().specifier, "^0.0.1");
    }

    #[test]
    fn test_unparseable_never_wins_lowest() {
        let parsed = usage("^1.0.0", "b", DependencyType::Runtime);
        for other in ["github:acme/lib", "*", "latest", "file:../lib", "1.x"] {
            let other = usage(other, "a", DependencyType::Runtime);
            assert_eq!(select(&[&other, &parsed], false).unwrap().specifier, "^1.0.0");
            assert_eq!(select(&[&parsed, &other], false).unwrap().specifier, "^1.0.0");
        }
    }

    #[test]
    fn test_lowest_compares_parseable_only() {
        let git = usage("github:acme/lib", "a", DependencyType::Runtime);
        let new = usage("^2.0.0", "b", DependencyType::Runtime);
        let old = usage("^1.4.0", "c", DependencyType::Runtime);
        assert_eq!(select(&[&git, &new, &old], false).unwrap().specifier, "^1.4.0");
        assert_eq!(select(&[&git, &new, &old], true).unwrap().specifier, "^2.0.0");
    }

    #[test]
    fn test_all_unparseable_falls_back_deterministically() {
        let git = usage("github:acme/lib", "b", DependencyType::Runtime);
        let star = usage("*", "a", DependencyType::Runtime);
        for highest in [true, false] {
            let forward = select(&[&git, &star], highest).unwrap();
            let backward = select(&[&star, &git], highest).unwrap();
            assert_eq!(forward, backward);
        }
        assert!(select(&[], false).is_none());
    }

    #[test]
    fn test_lowest_strategy_hoists_parseable_winner() {
        let conflicts = vec![record(
            "lib",
            vec![
                usage("github:acme/lib", "web", DependencyType::Runtime),
                usage("^1.0.0", "api", DependencyType::Runtime),
                usage("^1.2.0", "admin", DependencyType::Runtime),
            ],
        )];
        let resolution = resolve(&conflicts, Strategy::Lowest);
        assert_eq!(resolution.runtime["lib"], "^1.0.0");
    }

    fn spec_strategy() -> impl PropStrategy<Value = String> {
        prop_oneof![
            (0u64..5, 0u64..5, 0u64..5).prop_map(|(a, b, c)| format!("^{}.{}.{}", a, b, c)),
            (0u64..5, 0u64..5).prop_map(|(a, b)| format!("~{}.{}.0", a, b)),
            Just("latest".to_string()),
            Just("file:../lib".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_selection_invariant_under_permutation(
            specs in proptest::collection::vec((spec_strategy(), "[a-d]"), 1..8),
            highest in any::<bool>(),
        ) {
            let uses: Vec<VersionUse> = specs
                .iter()
                .map(|(spec, pkg)| usage(spec, pkg, DependencyType::Runtime))
                .collect();
            let forward: Vec<&VersionUse> = uses.iter().collect();
            let backward: Vec<&VersionUse> = uses.iter().rev().collect();

            let left = select(&forward, highest).unwrap();
            let right = select(&backward, highest).unwrap();
            prop_assert_eq!(left, right);

            // A parseable winner whenever one exists, never beaten by
            // another parseable candidate.
            let parses = |spec: &str| specifier::classify(spec).is_semver();
            if uses.iter().any(|u| parses(&u.specifier)) {
                prop_assert!(parses(&left.specifier));
            }
            for candidate in uses.iter().filter(|u| parses(&u.specifier) == parses(&left.specifier)) {
                let ordering = specifier::compare_raw(&left.specifier, &candidate.specifier);
                if highest {
                    prop_assert_ne!(ordering, Ordering::Less);
                } else {
                    prop_assert_ne!(ordering, Ordering::Greater);
                }
            }
        }
    }
}
