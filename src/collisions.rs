//! # File Collisions
//!
//! Root files that more than one repository carries (`.gitignore`,
//! `README.md`, `tsconfig.json`, ...) cannot all land at the monorepo root.
//! This module finds them and suggests what to do with each one. The plan
//! builder applies the suggestion unless the configuration overrides it.
//!
//! `package.json` is never reported: the root manifest is generated.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::manifest::MANIFEST_FILE;
use crate::merge;
use crate::package_manager::PackageManager;
use crate::repository::AcquiredRepo;

/// What to do with a root file that several repositories contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionStrategy {
    /// Combine the contents (JSON deep merge, otherwise union of lines).
    Merge,
    KeepFirst,
    KeepLast,
    /// One file per repository, named `stem.<repo>.ext`.
    Rename,
    /// Leave the file out of the root entirely.
    Skip,
}

impl CollisionStrategy {
    pub const ALL: [CollisionStrategy; 5] = [
        CollisionStrategy::Merge,
        CollisionStrategy::KeepFirst,
        CollisionStrategy::KeepLast,
        CollisionStrategy::Rename,
        CollisionStrategy::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionStrategy::Merge => "merge",
            CollisionStrategy::KeepFirst => "keep-first",
            CollisionStrategy::KeepLast => "keep-last",
            CollisionStrategy::Rename => "rename",
            CollisionStrategy::Skip => "skip",
        }
    }
}

impl fmt::Display for CollisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollisionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CollisionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| Error::ConfigParse {
                message: format!("Unknown collision strategy '{}'", s),
                hint: Some("Use one of: merge, keep-first, keep-last, rename, skip".to_string()),
            })
    }
}

/// A root file present in more than one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCollision {
    pub path: String,
    /// Contributing repositories, in source order.
    pub repos: Vec<String>,
    pub suggested: CollisionStrategy,
}

const IGNORE_FILES: &[&str] = &[
    ".gitignore",
    ".npmignore",
    ".prettierignore",
    ".eslintignore",
    ".dockerignore",
    ".gitattributes",
];

/// Suggested strategy for a colliding root file.
pub fn suggest_strategy(relative_path: &str) -> CollisionStrategy {
    let is_lockfile = PackageManager::ALL
        .iter()
        .any(|pm| pm.lockfile_name() == relative_path)
        || relative_path == "npm-shrinkwrap.json";
    if is_lockfile {
        return CollisionStrategy::Skip;
    }
    let upper = relative_path.to_ascii_uppercase();
    if upper.starts_with("LICENSE") || upper.starts_with("LICENCE") {
        return CollisionStrategy::KeepFirst;
    }
    if IGNORE_FILES.contains(&relative_path) || merge::is_json_file(relative_path) {
        return CollisionStrategy::Merge;
    }
    CollisionStrategy::Rename
}

/// File name used for one repository's copy under the `rename` strategy.
///
/// `README.md` becomes `README.web.md`; names without an extension, and
/// dotfiles like `.nvmrc`, get the repository appended.
pub fn renamed(relative_path: &str, repo: &str) -> String {
    match relative_path.rfind('.') {
        Some(dot) if dot > 0 => format!(
            "{}.{}{}",
            &relative_path[..dot],
            repo,
            &relative_path[dot..]
        ),
        _ => format!("{}.{}", relative_path, repo),
    }
}

/// Regular files directly inside `dir`, sorted. `package.json` excluded.
pub fn root_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Filesystem {
            message: format!("Failed to list {}: {}", dir.display(), e),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name != MANIFEST_FILE {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Find every root file that more than one repository carries.
pub fn detect(repos: &[AcquiredRepo]) -> Result<Vec<FileCollision>> {
    let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for repo in repos {
        for file in root_files(&repo.path)? {
            owners.entry(file).or_default().push(repo.name.clone());
        }
    }

    Ok(owners
        .into_iter()
        .filter(|(_, repos)| repos.len() > 1)
        .map(|(path, repos)| FileCollision {
            suggested: suggest_strategy(&path),
            path,
            repos,
        })
        .collect())
}
