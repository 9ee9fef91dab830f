//! Lockfile readers.
//!
//! Conflict detection compares what manifests *declare* with what was
//! actually *resolved*. The resolved side comes from whichever lockfile a
//! repository carries. Only direct dependencies of the root package are
//! read; transitive entries are irrelevant to the merge.
//!
//! Supported formats:
//! - `package-lock.json` v1 (`dependencies`) and v2/v3 (`packages`)
//! - `pnpm-lock.yaml` with `importers` (v6+) or top-level `dependencies`
//! - `yarn.lock` v1 and berry

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::error::{Error, Result};
use crate::manifest::PackageDescriptor;
use crate::package_manager::PackageManager;

/// Resolved version per direct dependency name.
pub type ResolvedVersions = BTreeMap<String, String>;

/// Detect which package manager a repository uses from its lockfile.
pub fn detect_package_manager(dir: &Path) -> Option<PackageManager> {
    PackageManager::ALL
        .into_iter()
        .find(|pm| dir.join(pm.lockfile_name()).is_file())
}

/// Read the resolved versions of `package`'s direct dependencies from the
/// lockfile in `dir`, if there is one.
pub fn read_resolved(dir: &Path, package: &PackageDescriptor) -> Result<Option<ResolvedVersions>> {
    let Some(pm) = detect_package_manager(dir) else {
        return Ok(None);
    };
    let path = dir.join(pm.lockfile_name());
    let content = std::fs::read_to_string(&path)?;
    debug!("Reading {} lockfile {}", pm, path.display());

    let resolved = match pm {
        PackageManager::Npm => parse_package_lock(&content)?,
        PackageManager::Pnpm => parse_pnpm_lock(&content)?,
        PackageManager::Yarn => parse_yarn_lock(&content, package),
    };
    Ok(Some(resolved))
}

/// Parse `package-lock.json`.
pub fn parse_package_lock(content: &str) -> Result<ResolvedVersions> {
    let lock: JsonValue = serde_json::from_str(content)?;
    let mut resolved = ResolvedVersions::new();

    if let Some(packages) = lock.get("packages").and_then(JsonValue::as_object) {
        for (key, entry) in packages {
            // Direct dependencies only: "node_modules/x", not "node_modules/x/node_modules/y"
            let Some(name) = key.strip_prefix("node_modules/") else {
                continue;
            };
            if name.contains("/node_modules/") {
                continue;
            }
            if let Some(version) = entry.get("version").and_then(JsonValue::as_str) {
                resolved.insert(name.to_string(), version.to_string());
            }
        }
        return Ok(resolved);
    }

    if let Some(deps) = lock.get("dependencies").and_then(JsonValue::as_object) {
        for (name, entry) in deps {
            if let Some(version) = entry.get("version").and_then(JsonValue::as_str) {
                resolved.insert(name.clone(), version.to_string());
            }
        }
    }
    Ok(resolved)
}

/// Parse `pnpm-lock.yaml`.
pub fn parse_pnpm_lock(content: &str) -> Result<ResolvedVersions> {
    let lock: YamlValue = serde_yaml::from_str(content)?;
    let mut resolved = ResolvedVersions::new();

    let root = lock
        .get("importers")
        .and_then(|importers| importers.get("."))
        .unwrap_or(&lock);

    for block in ["dependencies", "devDependencies", "optionalDependencies"] {
        let Some(YamlValue::Mapping(deps)) = root.get(block) else {
            continue;
        };
        for (name, entry) in deps {
            let Some(name) = name.as_str() else {
                continue;
            };
            // v6+: {specifier, version}; v5: plain version string
            let version = match entry {
                YamlValue::String(v) => Some(v.as_str()),
                YamlValue::Mapping(_) => entry.get("version").and_then(YamlValue::as_str),
                _ => None,
            };
            if let Some(version) = version {
                resolved.insert(name.to_string(), strip_peer_suffix(version).to_string());
            }
        }
    }
    Ok(resolved)
}

/// pnpm appends peer context to versions: `18.2.0(react@18.2.0)`.
fn strip_peer_suffix(version: &str) -> &str {
    version.split('(').next().unwrap_or(version).trim()
}

/// Parse `yarn.lock`, keeping the entries that match the package's declared
/// `name@range` descriptors.
pub fn parse_yarn_lock(content: &str, package: &PackageDescriptor) -> ResolvedVersions {
    let entries = parse_yarn_entries(content);
    let mut resolved = ResolvedVersions::new();

    for (_, name, specifier) in package.all_dependencies() {
        let candidates = [
            format!("{}@{}", name, specifier),
            format!("{}@npm:{}", name, specifier),
        ];
        if let Some(version) = candidates.iter().find_map(|key| entries.get(key)) {
            resolved.insert(name.clone(), version.clone());
        }
    }
    resolved
}

/// Map every `name@range` descriptor in a yarn.lock to its resolved version.
fn parse_yarn_entries(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut current: Vec<String> = Vec::new();

    for line in content.lines() {
        if line.trim_start().starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') && line.ends_with(':') {
            current = line
                .trim_end_matches(':')
                .split(", ")
                .map(|d| d.trim().trim_matches('"').to_string())
                .collect();
            continue;
        }
        let trimmed = line.trim();
        let version = trimmed
            .strip_prefix("version ")
            .or_else(|| trimmed.strip_prefix("version: "));
        if let Some(version) = version {
            let version = version.trim().trim_matches('"');
            for descriptor in &current {
                entries.insert(descriptor.clone(), version.to_string());
            }
        }
    }
    entries
}

/// Read `<dir>/<lockfile>` and fail when it is missing or empty.
pub fn require_non_empty(dir: &Path) -> Result<std::path::PathBuf> {
    for pm in PackageManager::ALL {
        let path = dir.join(pm.lockfile_name());
        if let Ok(meta) = std::fs::metadata(&path)
            && meta.is_file()
            && meta.len() > 0
        {
            return Ok(path);
        }
    }
    Err(Error::Filesystem {
        message: format!("No non-empty lockfile found in {}", dir.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn descriptor(deps: &[(&str, &str)]) -> PackageDescriptor {
        PackageDescriptor {
            name: "app".to_string(),
            version: "1.0.0".to_string(),
            dependencies: deps
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
            dev_dependencies: BTreeMap::new(),
            peer_dependencies: BTreeMap::new(),
            scripts: BTreeMap::new(),
            repo: "app".to_string(),
            path: PathBuf::from("/tmp/app"),
        }
    }

    #[test]
    fn test_parse_package_lock_v3() {
        let lock = r#"{
  "lockfileVersion": 3,
  "packages": {
    "": {"name": "app"},
    "node_modules/lodash": {"version": "4.17.21"},
    "node_modules/@types/node": {"version": "20.11.0"},
    "node_modules/lodash/node_modules/nested": {"version": "1.0.0"}
  }
}"#;
        let resolved = parse_package_lock(lock).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["lodash"], "4.17.21");
        assert_eq!(resolved["@types/node"], "20.11.0");
    }

    #[test]
    fn test_parse_package_lock_v1() {
        let lock = r#"{"lockfileVersion": 1, "dependencies": {"react": {"version": "17.0.2"}}}"#;
        let resolved = parse_package_lock(lock).unwrap();
        assert_eq!(resolved["react"], "17.0.2");
    }

    #[test]
    fn test_parse_pnpm_lock_importers() {
        let lock = r#"
lockfileVersion: '9.0'
importers:
  .:
    dependencies:
      react-dom:
        specifier: ^18.2.0
        version: 18.2.0(react@18.2.0)
    devDependencies:
      typescript:
        specifier: ^5.4.0
        version: 5.4.5
"#;
        let resolved = parse_pnpm_lock(lock).unwrap();
        assert_eq!(resolved["react-dom"], "18.2.0");
        assert_eq!(resolved["typescript"], "5.4.5");
    }

    #[test]
    fn test_parse_pnpm_lock_legacy() {
        let lock = "lockfileVersion: 5.4\ndependencies:\n  lodash: 4.17.15\n";
        let resolved = parse_pnpm_lock(lock).unwrap();
        assert_eq!(resolved["lodash"], "4.17.15");
    }

    #[test]
    fn test_parse_yarn_lock_v1() {
        let lock = r#"# THIS IS AN AUTOGENERATED FILE.
# yarn lockfile v1


"lodash@^4.17.15", lodash@^4.17.21:
  version "4.17.21"
  resolved "https://registry.yarnpkg.com/lodash/-/lodash-4.17.21.tgz"

"@babel/core@^7.0.0":
  version "7.24.0"
"#;
        let resolved = parse_yarn_lock(
            lock,
            &descriptor(&[("lodash", "^4.17.15"), ("@babel/core", "^7.0.0"), ("missing", "1.0.0")]),
        );
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["lodash"], "4.17.21");
        assert_eq!(resolved["@babel/core"], "7.24.0");
    }

    #[test]
    fn test_parse_yarn_lock_berry() {
        let lock = r#"__metadata:
  version: 8

"react@npm:^18.2.0":
  version: 18.2.0
  resolution: "react@npm:18.2.0"
"#;
        let resolved = parse_yarn_lock(lock, &descriptor(&[("react", "^18.2.0")]));
        assert_eq!(resolved["react"], "18.2.0");
    }

    #[test]
    fn test_detect_and_read_resolved() {
        let temp = TempDir::new().unwrap();
        assert!(detect_package_manager(temp.path()).is_none());
        assert!(read_resolved(temp.path(), &descriptor(&[])).unwrap().is_none());

        std::fs::write(
            temp.path().join("package-lock.json"),
            r#"{"packages": {"node_modules/lodash": {"version": "4.17.15"}}}"#,
        )
        .unwrap();
        assert_eq!(detect_package_manager(temp.path()), Some(PackageManager::Npm));
        let resolved = read_resolved(temp.path(), &descriptor(&[])).unwrap().unwrap();
        assert_eq!(resolved["lodash"], "4.17.15");
    }

    #[test]
    fn test_require_non_empty() {
        let temp = TempDir::new().unwrap();
        assert!(require_non_empty(temp.path()).is_err());
        std::fs::write(temp.path().join("pnpm-lock.yaml"), "").unwrap();
        assert!(require_non_empty(temp.path()).is_err());
        std::fs::write(temp.path().join("pnpm-lock.yaml"), "lockfileVersion: '9.0'\n").unwrap();
        assert!(require_non_empty(temp.path()).is_ok());
    }
}
