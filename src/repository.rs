//! # Repository Acquisition
//!
//! This module provides the `RepositoryManager`, which makes every source
//! repository of a merge available as a local directory inside the run's
//! work directory.
//!
//! ## Design
//!
//! Sources are either local directories or git URLs:
//!
//! - Local directories are copied (without `.git` and `node_modules`), so
//!   that apply can later move them without touching the originals.
//! - Remote repositories are shallow-cloned through the `GitOperations`
//!   trait, wrapped in [`crate::git::retry_with_backoff`].
//!
//! `GitOperations` separates the acquisition logic from the `git` command,
//! which allows tests to substitute a mock implementation.
//!
//! Acquisition fans out over a dedicated rayon pool with a fixed number of
//! threads, so N sources never open more than `concurrency` clones at once.
//! Results keep the order of the input sources.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::filesystem;
use crate::git::{self, RetryPolicy};

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Shallow-clone `url` (at `reference`, if given) into `target_dir`.
    fn clone_shallow(&self, url: &str, reference: Option<&str>, target_dir: &Path) -> Result<()>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn clone_shallow(&self, url: &str, reference: Option<&str>, target_dir: &Path) -> Result<()> {
        git::clone_shallow(url, reference, target_dir)
    }
}

/// Where a source repository comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Local(PathBuf),
    Remote {
        url: String,
        reference: Option<String>,
    },
}

impl SourceSpec {
    /// Parse a source argument.
    ///
    /// `https://`, `http://`, `ssh://`, `git://`, `file://` and `git@host:path`
    /// are remote; a `#ref` suffix selects a branch or tag. Anything else is a
    /// local path.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Acquire {
                source_ref: raw.to_string(),
                message: "empty source".to_string(),
            });
        }

        let is_remote = ["https://", "http://", "ssh://", "git://", "file://"]
            .iter()
            .any(|scheme| raw.starts_with(scheme))
            || raw.starts_with("git@");
        if !is_remote {
            return Ok(SourceSpec::Local(PathBuf::from(raw)));
        }

        let (url, reference) = match raw.split_once('#') {
            Some((url, reference)) if !reference.is_empty() => (url, Some(reference.to_string())),
            Some((url, _)) => (url, None),
            None => (raw, None),
        };
        if !url.starts_with("git@") {
            Url::parse(url)?;
        }
        Ok(SourceSpec::Remote {
            url: url.to_string(),
            reference,
        })
    }

    /// Base name used for the acquired directory: the last path segment
    /// without a `.git` suffix.
    pub fn base_name(&self) -> String {
        let raw = match self {
            SourceSpec::Local(path) => path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            SourceSpec::Remote { url, .. } => {
                let path = match Url::parse(url) {
                    Ok(parsed) => parsed.path().to_string(),
                    // scp-like syntax: git@host:owner/repo.git
                    Err(_) => url.rsplit(':').next().unwrap_or(url).to_string(),
                };
                path.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            }
        };
        let name = sanitize_name(raw.trim_end_matches(".git"));
        if name.is_empty() {
            "repo".to_string()
        } else {
            name
        }
    }
}

/// Lowercase, keep `[a-z0-9._-]`, replace everything else with `-`.
pub fn sanitize_name(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    sanitized.trim_matches(['-', '.']).to_string()
}

/// Make names unique in order: the second `web` becomes `web-2`, the third
/// `web-3`, skipping any suffix another source uses verbatim.
pub fn unique_names<S: AsRef<str>>(bases: &[S]) -> Vec<String> {
    let verbatim: BTreeSet<&str> = bases.iter().map(|b| b.as_ref()).collect();
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut names = Vec::with_capacity(bases.len());
    for base in bases {
        let base = base.as_ref();
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while used.contains(&candidate) {
            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
            if verbatim.contains(candidate.as_str()) && !used.contains(&candidate) {
                // Reserved for the source that is literally named that way.
                candidate = base.to_string();
            }
        }
        used.insert(candidate.clone());
        names.push(candidate);
    }
    names
}

/// A source made available locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquiredRepo {
    /// Collision-free name, unique within the run.
    pub name: String,
    pub path: PathBuf,
    /// The source argument as given.
    pub source: String,
}

/// Acquires source repositories into a work directory.
pub struct RepositoryManager {
    git_ops: Box<dyn GitOperations>,
    target_root: PathBuf,
    retry: RetryPolicy,
    concurrency: usize,
}

impl RepositoryManager {
    /// Creates a `RepositoryManager` that places sources under `target_root`.
    pub fn new(target_root: PathBuf) -> Self {
        Self {
            git_ops: Box::new(DefaultGitOperations),
            target_root,
            retry: RetryPolicy::default(),
            concurrency: crate::defaults::CONCURRENCY,
        }
    }

    /// Creates a `RepositoryManager` with a custom `GitOperations`.
    ///
    /// This is primarily used for testing to inject mock operations.
    pub fn with_operations(target_root: PathBuf, git_ops: Box<dyn GitOperations>) -> Self {
        Self {
            git_ops,
            ..Self::new(target_root)
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Acquire every source, preserving input order.
    ///
    /// All sources are parsed before anything is copied or cloned, so a
    /// malformed argument fails the run without side effects.
    pub fn acquire_all<S: AsRef<str>>(&self, sources: &[S]) -> Result<Vec<AcquiredRepo>> {
        let specs = sources
            .iter()
            .map(|s| SourceSpec::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let names = unique_names(&specs.iter().map(SourceSpec::base_name).collect::<Vec<_>>());

        std::fs::create_dir_all(&self.target_root)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()?;

        let raw: Vec<&str> = sources.iter().map(|s| s.as_ref()).collect();
        pool.install(|| {
            raw.par_iter()
                .zip(specs.par_iter())
                .zip(names.par_iter())
                .map(|((source, spec), name)| self.acquire(source, spec, name))
                .collect::<Result<Vec<_>>>()
        })
    }

    fn acquire(&self, source: &str, spec: &SourceSpec, name: &str) -> Result<AcquiredRepo> {
        let target = self.target_root.join(name);
        let wrap = |e: Error| Error::Acquire {
            source_ref: source.to_string(),
            message: e.to_string(),
        };

        match spec {
            SourceSpec::Local(path) => {
                if !path.is_dir() {
                    return Err(Error::Acquire {
                        source_ref: source.to_string(),
                        message: format!("{} is not a directory", path.display()),
                    });
                }
                if target.exists() {
                    std::fs::remove_dir_all(&target).map_err(|e| wrap(e.into()))?;
                }
                let files = filesystem::copy_tree(path, &target, filesystem::SKIPPED_DIRS)
                    .map_err(wrap)?;
                info!("Copied {} ({} files) to {}", source, files, target.display());
            }
            SourceSpec::Remote { url, reference } => {
                git::retry_with_backoff(&self.retry, url, |_| {
                    self.git_ops
                        .clone_shallow(url, reference.as_deref(), &target)
                })
                .map_err(wrap)?;
                info!("Cloned {} to {}", url, target.display());
            }
        }

        Ok(AcquiredRepo {
            name: name.to_string(),
            path: target,
            source: source.to_string(),
        })
    }
}
