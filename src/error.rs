//! # Error Handling
//!
//! This module defines the centralized error type for the `monorepo-merge`
//! library. It uses the `thiserror` library to create a single `Error` enum
//! that covers every anticipated failure mode of the analyze → plan → apply →
//! verify pipeline, with enough context in each variant to act on it.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum that represents all possible errors that can
//!   occur within the library.
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`, used
//!   throughout the library.
//!
//! The variants fall into four families:
//!
//! - Validation errors (`ConfigParse`, `Manifest`, `PlanValidation`) are
//!   raised before anything touches the filesystem.
//! - Acquisition errors (`GitClone`, `GitCommand`, `Acquire`) carry the last
//!   underlying failure after retries are exhausted.
//! - Apply errors (`Step`, `Cancelled`, `OperationLog`) are recorded in the
//!   operation log before they propagate.
//! - Wrapped library errors (`Io`, `Json`, `Yaml`, ...).

use thiserror::Error;

/// Main error type for monorepo-merge operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error occurred while parsing the `.monorepo-merge.yaml` configuration file.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A `package.json` could not be read or is structurally invalid.
    #[error("Invalid manifest {path}: {message}")]
    Manifest { path: String, message: String },

    /// A plan document failed structural validation.
    ///
    /// Apply and verify refuse to run against such a plan.
    #[error("Invalid plan: {message}")]
    PlanValidation { message: String },

    /// An error occurred while cloning a Git repository.
    #[error("Git clone error for {url}: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    GitClone {
        url: String,
        message: String,
        /// Optional hint for how to resolve the clone issue
        hint: Option<String>,
    },

    /// An error occurred while executing a Git command.
    #[error("Git command failed for {url}: {command} - {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    /// A source repository could not be made available locally.
    #[error("Failed to acquire {source_ref}: {message}")]
    Acquire { source_ref: String, message: String },

    /// An apply step failed.
    #[error("Apply step '{step}' failed: {message}")]
    Step { step: String, message: String },

    /// The run was cancelled before or during a step.
    #[error("Cancelled during step '{step}'")]
    Cancelled { step: String },

    /// The operation log is unreadable or belongs to a different plan.
    #[error("Operation log error: {message}")]
    OperationLog { message: String },

    /// An external command (install, build, test) could not run or failed.
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// An error occurred with a filesystem operation.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// An error occurred while merging colliding files.
    #[error("Merge operation error: {operation} - {message}")]
    Merge { operation: String, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The worker pool for parallel acquisition could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// True when the error came from cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
