//! Shared test utilities for integration and E2E tests.
//!
//! This module provides fixtures for building source repositories on disk
//! and running the `monorepo-merge` binary against them.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new()
//!         .with_repo("web", r#"{"name": "web", "version": "1.0.0"}"#);
//!     // ... test code
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::manifests;
    pub use super::TestFixture;
}

/// Package manifests used across scenarios.
#[allow(dead_code)]
pub mod manifests {
    pub const LODASH_OLD: &str = r#"{
  "name": "web",
  "version": "1.0.0",
  "dependencies": { "lodash": "^4.17.15" }
}"#;

    pub const LODASH_NEW: &str = r#"{
  "name": "api",
  "version": "2.0.0",
  "dependencies": { "lodash": "^4.17.21" }
}"#;

    pub const REACT_17: &str = r#"{
  "name": "legacy",
  "version": "1.0.0",
  "dependencies": { "react": "^17.0.2" }
}"#;

    pub const REACT_18: &str = r#"{
  "name": "admin",
  "version": "1.0.0",
  "dependencies": { "react": "^18.2.0" }
}"#;

    pub const CYCLE_A: &str = r#"{
  "name": "pkg-a",
  "version": "1.0.0",
  "dependencies": { "pkg-b": "workspace:*" }
}"#;

    pub const CYCLE_B: &str = r#"{
  "name": "pkg-b",
  "version": "1.0.0",
  "dependencies": { "pkg-a": "workspace:*" }
}"#;
}

/// A temporary directory holding source repositories and a work directory.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Add a source repository `repos/<name>` with the given `package.json`.
    pub fn with_repo(self, name: &str, manifest: &str) -> Self {
        self.temp_dir
            .child(format!("repos/{}/package.json", name))
            .write_str(manifest)
            .expect("Failed to write manifest");
        self
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of a source repository as given on the command line.
    pub fn repo(&self, name: &str) -> String {
        self.temp_dir
            .path()
            .join("repos")
            .join(name)
            .display()
            .to_string()
    }

    /// Directory sources are acquired into.
    pub fn work_dir(&self) -> PathBuf {
        self.temp_dir.path().join("work")
    }

    /// Create a child path in the temp directory.
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// A `monorepo-merge` command running in the fixture with colors off and
    /// the work directory inside the fixture.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("monorepo-merge");
        cmd.current_dir(self.path())
            .env("MONOREPO_MERGE_CACHE", self.work_dir())
            .env_remove("MONOREPO_MERGE_CONFIG")
            .env("NO_COLOR", "1");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
