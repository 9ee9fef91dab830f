//! Default values for monorepo-merge configuration.
//!
//! This module provides centralized default values used across commands and
//! the library, ensuring consistency and avoiding duplication.

use std::path::PathBuf;
use std::time::Duration;

/// Name of the optional merge configuration file.
pub const CONFIG_FILE: &str = ".monorepo-merge.yaml";

/// Directory (inside the output root) that receives every package.
pub const PACKAGES_DIR: &str = "packages";

/// Root `engines.node` constraint written into generated manifests.
pub const NODE_ENGINE: &str = ">=18";

/// Root package name when none is configured.
pub const ROOT_NAME: &str = "monorepo";

/// Worker threads used to acquire sources in parallel.
pub const CONCURRENCY: usize = 4;

/// Attempts per clone before a transient failure becomes terminal.
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Versions pinned in the root `packageManager` field.
pub const NPM_VERSION: &str = "10.8.2";
pub const YARN_VERSION: &str = "1.22.22";
pub const PNPM_VERSION: &str = "9.12.0";

/// Returns the default work directory that sources are acquired into.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/monorepo-merge` (XDG Base Directory)
/// - macOS: `~/Library/Caches/monorepo-merge`
/// - Windows: `{FOLDERID_LocalAppData}\monorepo-merge`
///
/// Falls back to `.monorepo-merge-cache` in the current directory if the
/// platform cache directory cannot be determined.
///
/// This can be overridden by the `--work-dir` CLI flag or the
/// `MONOREPO_MERGE_CACHE` environment variable.
pub fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".monorepo-merge-cache"))
        .join("monorepo-merge")
}
