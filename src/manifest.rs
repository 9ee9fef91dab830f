//! # Package Manifests
//!
//! Typed access to `package.json` for the fields the merge reads or writes,
//! and the immutable `PackageDescriptor` snapshot every later phase works on.
//!
//! `package.json` files carry arbitrary extra fields (`repository`, `files`,
//! `exports`, tool configuration, ...). Those are kept in a passthrough bucket
//! (`PackageManifest::extra`) and re-emitted unchanged, so rewriting a
//! manifest only ever touches the fields it means to touch.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Name of the manifest file in every package root.
pub const MANIFEST_FILE: &str = "package.json";

/// Which dependency block a dependency was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyType {
    #[serde(rename = "dependencies")]
    Runtime,
    #[serde(rename = "devDependencies")]
    Dev,
    #[serde(rename = "peerDependencies")]
    Peer,
}

impl DependencyType {
    pub const ALL: [DependencyType; 3] = [
        DependencyType::Runtime,
        DependencyType::Dev,
        DependencyType::Peer,
    ];

    /// The manifest field name for this block.
    pub fn field(&self) -> &'static str {
        match self {
            DependencyType::Runtime => "dependencies",
            DependencyType::Dev => "devDependencies",
            DependencyType::Peer => "peerDependencies",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Typed view of `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspaces: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engines: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    /// Every field not listed above, in original order.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Parse a manifest from JSON text. `origin` is used in error messages.
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content).map_err(|e| Error::Manifest {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        Self::from_value(value, origin)
    }

    pub fn from_value(value: Value, origin: &str) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Manifest {
                path: origin.to_string(),
                message: "manifest must be a JSON object".to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| Error::Manifest {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Read `<dir>/package.json`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::Manifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn dependencies_of(&self, dep_type: DependencyType) -> Option<&BTreeMap<String, String>> {
        match dep_type {
            DependencyType::Runtime => self.dependencies.as_ref(),
            DependencyType::Dev => self.dev_dependencies.as_ref(),
            DependencyType::Peer => self.peer_dependencies.as_ref(),
        }
    }

    fn dependencies_of_mut(&mut self, dep_type: DependencyType) -> &mut Option<BTreeMap<String, String>> {
        match dep_type {
            DependencyType::Runtime => &mut self.dependencies,
            DependencyType::Dev => &mut self.dev_dependencies,
            DependencyType::Peer => &mut self.peer_dependencies,
        }
    }

    /// Replace the specifier of an already-declared dependency.
    ///
    /// Returns false when `name` is not declared in that block.
    pub fn set_dependency(&mut self, dep_type: DependencyType, name: &str, specifier: &str) -> bool {
        match self.dependencies_of_mut(dep_type) {
            Some(deps) if deps.contains_key(name) => {
                deps.insert(name.to_string(), specifier.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Pretty JSON with a trailing newline, the way npm writes it.
    pub fn to_pretty_string(&self) -> Result<String> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        Ok(content)
    }
}

/// Immutable snapshot of one package, created once per scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    /// Identifier of the repository the package came from.
    pub repo: String,
    pub path: PathBuf,
}

impl PackageDescriptor {
    /// Build a descriptor from a parsed manifest.
    ///
    /// A manifest without a name falls back to the repository id, and one
    /// without a version to `0.0.0`; verification reports both separately.
    pub fn from_manifest(repo: &str, path: &Path, manifest: &PackageManifest) -> Self {
        Self {
            name: manifest.name.clone().unwrap_or_else(|| repo.to_string()),
            version: manifest.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
            dependencies: manifest.dependencies.clone().unwrap_or_default(),
            dev_dependencies: manifest.dev_dependencies.clone().unwrap_or_default(),
            peer_dependencies: manifest.peer_dependencies.clone().unwrap_or_default(),
            scripts: manifest.scripts.clone().unwrap_or_default(),
            repo: repo.to_string(),
            path: path.to_path_buf(),
        }
    }

    /// Scan the package rooted at `dir`.
    pub fn scan(repo: &str, dir: &Path) -> Result<Self> {
        let manifest = PackageManifest::from_dir(dir)?;
        Ok(Self::from_manifest(repo, dir, &manifest))
    }

    pub fn deps(&self, dep_type: DependencyType) -> &BTreeMap<String, String> {
        match dep_type {
            DependencyType::Runtime => &self.dependencies,
            DependencyType::Dev => &self.dev_dependencies,
            DependencyType::Peer => &self.peer_dependencies,
        }
    }

    /// Every declared dependency as `(type, name, specifier)`.
    pub fn all_dependencies(&self) -> impl Iterator<Item = (DependencyType, &String, &String)> {
        DependencyType::ALL
            .into_iter()
            .flat_map(move |t| self.deps(t).iter().map(move |(n, s)| (t, n, s)))
    }

    /// Declared specifier for `name` in any block, runtime first.
    pub fn declared(&self, name: &str) -> Option<(DependencyType, &String)> {
        DependencyType::ALL
            .into_iter()
            .find_map(|t| self.deps(t).get(name).map(|s| (t, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
  "name": "@acme/web",
  "version": "1.2.0",
  "description": "Web app",
  "repository": {"type": "git", "url": "https://example.com/web.git"},
  "scripts": {"build": "vite build", "test": "vitest"},
  "dependencies": {"react": "^18.2.0"},
  "devDependencies": {"typescript": "^5.4.0"},
  "peerDependencies": {"react-dom": "^18.0.0"},
  "exports": {".": "./dist/index.js"}
}"#;

    #[test]
    fn test_parse_typed_fields() {
        let manifest = PackageManifest::parse(MANIFEST, "package.json").unwrap();
        assert_eq!(manifest.name.as_deref(), Some("@acme/web"));
        assert_eq!(manifest.version.as_deref(), Some("1.2.0"));
        assert_eq!(
            manifest.dependencies.as_ref().unwrap().get("react").unwrap(),
            "^18.2.0"
        );
        assert!(manifest.extra.contains_key("repository"));
        assert!(manifest.extra.contains_key("exports"));
    }

    #[test]
    fn test_passthrough_fields_survive_round_trip() {
        let manifest = PackageManifest::parse(MANIFEST, "package.json").unwrap();
        let emitted = manifest.to_pretty_string().unwrap();
        let reparsed = PackageManifest::parse(&emitted, "emitted").unwrap();
        assert_eq!(manifest, reparsed);

        let value: Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(value["repository"]["url"], "https://example.com/web.git");
        assert_eq!(value["description"], "Web app");
        // Unknown fields keep their relative order.
        let keys: Vec<&String> = manifest.extra.keys().collect();
        assert_eq!(keys, vec!["description", "repository", "exports"]);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let err = PackageManifest::parse("[1, 2]", "bad/package.json").unwrap_err();
        assert!(err.to_string().contains("bad/package.json"));
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_set_dependency_only_touches_declared() {
        let mut manifest = PackageManifest::parse(MANIFEST, "package.json").unwrap();
        assert!(manifest.set_dependency(DependencyType::Runtime, "react", "workspace:*"));
        assert!(!manifest.set_dependency(DependencyType::Runtime, "vue", "workspace:*"));
        assert_eq!(
            manifest.dependencies.as_ref().unwrap().get("react").unwrap(),
            "workspace:*"
        );
        assert!(!manifest.dependencies.as_ref().unwrap().contains_key("vue"));
    }

    #[test]
    fn test_descriptor_from_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MANIFEST_FILE), MANIFEST).unwrap();

        let descriptor = PackageDescriptor::scan("web-repo", temp.path()).unwrap();
        assert_eq!(descriptor.name, "@acme/web");
        assert_eq!(descriptor.repo, "web-repo");
        assert_eq!(descriptor.scripts.len(), 2);

        let all: Vec<_> = descriptor.all_dependencies().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].0, DependencyType::Runtime);
        assert_eq!(all[2].0, DependencyType::Peer);
    }

    #[test]
    fn test_descriptor_defaults_missing_name_and_version() {
        let manifest = PackageManifest::parse("{}", "package.json").unwrap();
        let descriptor = PackageDescriptor::from_manifest("repo-x", Path::new("/tmp/x"), &manifest);
        assert_eq!(descriptor.name, "repo-x");
        assert_eq!(descriptor.version, "0.0.0");
    }

    #[test]
    fn test_scan_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = PackageDescriptor::scan("empty", temp.path()).unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }
}
