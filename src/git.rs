//! Git access for remote sources, and the retry policy around it.
//!
//! Cloning uses the system `git` command, which automatically handles:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Personal access tokens
//! - Any authentication configured in ~/.gitconfig
//!
//! Clone failures are classified as transient (network hiccups worth
//! retrying) or permanent (authentication, missing repository) so that
//! [`retry_with_backoff`] only retries what can succeed on a later attempt.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Shallow-clone `url` into `target_dir`, optionally at `reference`.
pub fn clone_shallow(url: &str, reference: Option<&str>, target_dir: &Path) -> Result<()> {
    // Remove target directory if it exists (git won't clone into existing non-empty dir)
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut command = Command::new("git");
    command.args(["clone", "--depth=1"]);
    if let Some(reference) = reference {
        command.args(["--branch", reference]);
    }
    let output = command
        .arg(url)
        .arg(target_dir)
        .output()
        .map_err(|e| Error::GitCommand {
            command: "clone".to_string(),
            url: url.to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let classified = classify_clone_error(&stderr);
        let hint = (classified.classification == Classification::Permanent
            && is_auth_failure(&stderr))
        .then(|| {
            "Make sure you have access to the repository: SSH key added to ssh-agent, \
             git credentials configured, or a personal access token set up"
                .to_string()
        });
        return Err(Error::GitClone {
            url: url.to_string(),
            message: stderr,
            hint,
        });
    }
    Ok(())
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Transient,
    Permanent,
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub classification: Classification,
    pub detail: String,
}

/// Causes git reports for failures that will not go away on retry. Every
/// SSH failure ends with "Could not read from remote repository", so only
/// the line naming the cause counts.
const PERMANENT_MARKERS: &[&str] = &[
    "authentication failed",
    "permission denied (publickey",
    "could not read username",
    "repository not found",
    "does not appear to be a git repository",
    "not found in upstream",
    "access denied",
    "invalid username or password",
];

/// `fatal: repository 'https://host/org/name.git/' not found`
static MISSING_REPOSITORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"repository '[^']*' not found").expect("valid regex"));

const TRANSIENT_MARKERS: &[&str] = &[
    "could not resolve host",
    "temporary failure in name resolution",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "timed out",
    "connection reset",
    "connection closed by remote host",
    "the remote end hung up unexpectedly",
    "early eof",
    "network is unreachable",
    "no route to host",
    "ssl_read",
    "rpc failed",
];

fn is_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["authentication failed", "permission denied", "could not read username"]
        .iter()
        .any(|m| lower.contains(m))
}

/// Classify the stderr of a failed clone.
///
/// A named permanent cause wins over network markers in the same output.
/// Anything unrecognised is permanent: retrying an unknown failure only
/// delays the error.
pub fn classify_clone_error(stderr: &str) -> ClassifiedError {
    let lower = stderr.to_ascii_lowercase();
    let permanent = PERMANENT_MARKERS.iter().any(|m| lower.contains(m))
        || MISSING_REPOSITORY.is_match(&lower);
    let transient = TRANSIENT_MARKERS.iter().any(|m| lower.contains(m));
    let classification = if transient && !permanent {
        Classification::Transient
    } else {
        Classification::Permanent
    };
    ClassifiedError {
        classification,
        detail: stderr.trim().to_string(),
    }
}

/// Classify any library error for retry purposes.
pub fn classify(error: &Error) -> ClassifiedError {
    match error {
        Error::GitClone { message, .. } => classify_clone_error(message),
        Error::GitCommand { stderr, .. } => classify_clone_error(stderr),
        other => ClassifiedError {
            classification: Classification::Permanent,
            detail: other.to_string(),
        },
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay: defaults::RETRY_BASE_DELAY,
            max_delay: defaults::RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts count from 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. The last underlying error is returned unchanged.
pub fn retry_with_backoff<T, F>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => {
                let classified = classify(&e);
                if classified.classification == Classification::Permanent {
                    debug!("{}: permanent failure, not retrying", label);
                    return Err(e);
                }
                if attempt >= max_attempts {
                    warn!("{}: giving up after {} attempts", label, attempt);
                    return Err(e);
                }
                let delay = policy.delay(attempt);
                warn!(
                    "{}: transient failure (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, max_attempts, delay, classified.detail
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
