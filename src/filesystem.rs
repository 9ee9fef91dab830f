//! Filesystem helpers for acquisition and apply.
//!
//! Everything here works on the real filesystem: copying source trees into
//! the work directory, moving packages into the staging directory, writing
//! plan files and expanding workspace globs.

use std::fs;
use std::path::{Component, Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Directories never copied out of a source repository.
pub const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Whether `path` is a relative path that stays inside the directory it is
/// joined onto: not empty, not absolute, and without `..` components.
pub fn is_safe_relative(path: &str) -> bool {
    if path.trim().is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Recursively copy `src` to `dst`, skipping directories named in `skip`.
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> Result<u64> {
    let mut copied = 0;
    let walker = WalkDir::new(src).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !(entry.file_type().is_dir()
                && skip.iter().any(|s| entry.file_name() == std::ffi::OsStr::new(s)))
    });

    for entry in walker {
        let entry = entry.map_err(|e| Error::Filesystem {
            message: format!("Failed to walk {}: {}", src.display(), e),
        })?;
        let relative = entry.path().strip_prefix(src).map_err(|e| Error::Filesystem {
            message: format!("Unexpected path {}: {}", entry.path().display(), e),
        })?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else if entry.file_type().is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(link, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)?;
    Ok(())
}

/// Move the directory `src` to `dst`.
///
/// Tries a rename first and falls back to copy + remove when the rename
/// fails (for example across filesystems).
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_tree(src, dst, &[])?;
    fs::remove_dir_all(src).map_err(|e| Error::Filesystem {
        message: format!("Copied {} but failed to remove it: {}", src.display(), e),
    })?;
    Ok(())
}

/// Write `content` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &str) -> Result<PathBuf> {
    if !is_safe_relative(relative) {
        return Err(Error::Filesystem {
            message: format!("Refusing to write outside the output directory: {}", relative),
        });
    }
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
    Ok(path)
}

/// Remove a file or directory, logging instead of failing.
pub fn remove_best_effort(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return;
    };
    if let Err(e) = result {
        warn!("Failed to clean up {}: {}", path.display(), e);
    }
}

/// Expand workspace patterns (`packages/*`) relative to `root` into the
/// package directories that contain a `package.json`.
pub fn expand_workspace_globs(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for pattern in patterns {
        if pattern.starts_with('!') {
            continue;
        }
        let full = root.join(pattern);
        for entry in glob::glob(&full.to_string_lossy())? {
            let path = entry.map_err(|e| Error::Filesystem {
                message: format!("Failed to read workspace entry: {}", e),
            })?;
            if path.is_dir() && path.join(crate::manifest::MANIFEST_FILE).is_file() {
                dirs.push(path);
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("node_modules/lodash")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("src/index.ts"), "export {}").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(root.join("node_modules/lodash/index.js"), "").unwrap();
    }

    #[test]
    fn test_is_safe_relative() {
        assert!(is_safe_relative("packages"));
        assert!(is_safe_relative("packages/web/package.json"));
        assert!(is_safe_relative("./.gitignore"));
        assert!(!is_safe_relative(""));
        assert!(!is_safe_relative("/etc/passwd"));
        assert!(!is_safe_relative("../outside"));
        assert!(!is_safe_relative("packages/../../outside"));
    }

    #[test]
    fn test_copy_tree_skips_git_and_node_modules() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src-repo");
        let dst = temp.path().join("copy");
        populate(&src);

        let copied = copy_tree(&src, &dst, SKIPPED_DIRS).unwrap();
        assert_eq!(copied, 2);
        assert!(dst.join("package.json").is_file());
        assert!(dst.join("src/index.ts").is_file());
        assert!(!dst.join(".git").exists());
        assert!(!dst.join("node_modules").exists());
    }

    #[test]
    fn test_move_dir() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        let dst = temp.path().join("staging/packages/a");
        populate(&src);

        move_dir(&src, &dst).unwrap();
        assert!(!src.exists());
        assert!(dst.join("src/index.ts").is_file());
    }

    #[test]
    fn test_write_file_rejects_escape() {
        let temp = TempDir::new().unwrap();
        let path = write_file(temp.path(), "config/nested/file.txt", "hello").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "hello");
        assert!(write_file(temp.path(), "../evil.txt", "x").is_err());
    }

    #[test]
    fn test_remove_best_effort() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("staging");
        populate(&dir);
        remove_best_effort(&dir);
        assert!(!dir.exists());
        // Missing paths are ignored.
        remove_best_effort(&dir);
    }

    #[test]
    fn test_expand_workspace_globs() {
        let temp = TempDir::new().unwrap();
        for name in ["web", "api"] {
            let dir = temp.path().join("packages").join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("package.json"), "{}").unwrap();
        }
        fs::create_dir_all(temp.path().join("packages/empty")).unwrap();

        let dirs = expand_workspace_globs(temp.path(), &["packages/*".to_string()]).unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("packages/api"));
        assert!(dirs[1].ends_with("packages/web"));
    }
}
