//! # Monorepo Merge Library
//!
//! This library merges independently versioned JavaScript/TypeScript
//! repositories into a single workspace monorepo. It is designed to be used
//! by the `monorepo-merge` command-line tool but every phase is callable on
//! its own.
//!
//! ## Quick Example
//!
//! ```
//! use monorepo_merge::resolver::Strategy;
//! use monorepo_merge::specifier::{self, SpecifierKind};
//!
//! // Classify a few raw dependency specifiers
//! let range = specifier::classify("^18.2.0");
//! assert_eq!(range.kind, SpecifierKind::Semver);
//! assert_eq!(range.parsed.unwrap().to_string(), "18.2.0");
//!
//! let wildcard = specifier::classify("latest");
//! assert_eq!(wildcard.kind, SpecifierKind::Wildcard);
//!
//! // Resolution strategies parse from their kebab-case names
//! let strategy: Strategy = "hoist-with-overrides".parse().unwrap();
//! assert_eq!(strategy, Strategy::HoistWithOverrides);
//! ```
//!
//! ## Core Concepts
//!
//! - **Specifiers (`specifier`)**: Classification and ordering of raw
//!   dependency specifiers (semver ranges, git/file references, wildcards).
//! - **Conflicts (`conflicts`)**: Declared, lockfile-resolved and peer
//!   version conflicts across packages, graded by severity.
//! - **Graph (`graph`)**: Cross-package dependency edges, cycles, hotspots
//!   and the merge complexity score.
//! - **Resolution (`resolver`)**: Picks one version per conflicted
//!   dependency and writes package-manager overrides.
//! - **Plans (`plan`)**: The versioned, self-contained `ApplyPlan` document
//!   that the apply phase consumes.
//! - **Operation log (`oplog`)**: The append-only JSON-lines record that
//!   makes an apply resumable.
//! - **Repository acquisition (`repository`, `git`)**: Copies local sources
//!   and clones remote ones with retry.
//!
//! ## Execution Flow
//!
//! The entry points live in `phases::orchestrator`:
//!
//! 1.  **Analyze**: Acquire sources, read manifests and lockfiles, detect
//!     conflicts, cycles and root file collisions.
//! 2.  **Plan**: Resolve conflicts and produce an `ApplyPlan` file.
//! 3.  **Apply**: Execute the plan in a staging directory, recording each
//!     step, and promote it to the output directory on success.
//! 4.  **Verify**: Check a plan or a merged directory at the static,
//!     install or full tier.

pub mod cancel;
pub mod collisions;
pub mod config;
pub mod conflicts;
pub mod defaults;
pub mod error;
pub mod filesystem;
pub mod git;
pub mod graph;
pub mod lockfile;
pub mod manifest;
pub mod merge;
pub mod oplog;
pub mod output;
pub mod package_manager;
pub mod phases;
pub mod plan;
pub mod process;
pub mod repository;
pub mod resolver;
pub mod specifier;
