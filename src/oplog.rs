//! # Operation Log
//!
//! Append-only, newline-delimited JSON record of an apply run, stored beside
//! its staging directory as `<staging>.oplog.jsonl`.
//!
//! The first line is a header carrying the SHA-256 of the plan the run
//! executes. Every following line is an [`OperationLogEntry`]. A log is only
//! ever reopened for the exact plan it was created for; anything else is an
//! error rather than a silent restart.
//!
//! A crash can leave a torn final line behind. Unparseable entry lines are
//! ignored when reading, and a missing trailing newline is repaired before
//! the next append.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const HEADER_KIND: &str = "header";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    pub step: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationLogEntry {
    pub fn started(step: &str) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Started,
            timestamp: Utc::now(),
            outputs: Vec::new(),
            duration_ms: None,
            error: None,
        }
    }

    pub fn completed(step: &str, outputs: Vec<String>, duration: Duration) -> Self {
        Self {
            status: StepStatus::Completed,
            outputs,
            duration_ms: Some(duration.as_millis() as u64),
            ..Self::started(step)
        }
    }

    pub fn failed(step: &str, error: &str, duration: Duration) -> Self {
        Self {
            status: StepStatus::Failed,
            duration_ms: Some(duration.as_millis() as u64),
            error: Some(error.to_string()),
            ..Self::started(step)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogHeader {
    pub kind: String,
    pub plan_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Read only the header of the log at `path`.
pub fn read_header(path: &Path) -> Result<LogHeader> {
    let content = fs::read_to_string(path)?;
    parse_header(path, content.lines().next().unwrap_or_default())
}

fn parse_header(path: &Path, line: &str) -> Result<LogHeader> {
    let header: LogHeader = serde_json::from_str(line).map_err(|e| Error::OperationLog {
        message: format!("{} has no valid header: {}", path.display(), e),
    })?;
    if header.kind != HEADER_KIND {
        return Err(Error::OperationLog {
            message: format!("{} does not start with a header line", path.display()),
        });
    }
    Ok(header)
}

/// A single-writer handle on one operation log.
#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    header: LogHeader,
    entries: Vec<OperationLogEntry>,
    file: File,
}

impl OperationLog {
    /// Create the log at `path`, or reopen it when it already exists and
    /// was written for `plan_hash`.
    pub fn open_or_create(path: &Path, plan_hash: &str) -> Result<Self> {
        if path.exists() {
            return Self::reopen(path, plan_hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let header = LogHeader {
            kind: HEADER_KIND.to_string(),
            plan_hash: plan_hash.to_string(),
            created_at: Utc::now(),
        };
        let mut file = OpenOptions::new().create_new(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(&header)?)?;
        file.sync_data()?;
        debug!("Created operation log {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            header,
            entries: Vec::new(),
            file,
        })
    }

    fn reopen(path: &Path, plan_hash: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();
        let header = parse_header(path, lines.next().unwrap_or_default())?;
        if header.plan_hash != plan_hash {
            return Err(Error::OperationLog {
                message: format!(
                    "{} belongs to plan {} but the current plan is {}",
                    path.display(),
                    header.plan_hash,
                    plan_hash
                ),
            });
        }

        let entries: Vec<OperationLogEntry> = lines
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let mut file = OpenOptions::new().append(true).open(path)?;
        if !content.ends_with('\n') {
            // Torn final write; start the next entry on a fresh line.
            writeln!(file)?;
        }
        debug!(
            "Reopened operation log {} with {} entries",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            entries,
            file,
        })
    }

    /// Append one entry and flush it to disk.
    pub fn append(&mut self, entry: OperationLogEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line).map_err(|e| Error::OperationLog {
            message: format!("Failed to append to {}: {}", self.path.display(), e),
        })?;
        self.file.sync_data()?;
        self.entries.push(entry);
        Ok(())
    }

    /// Whether the latest entry for `step` is `Completed`.
    pub fn is_completed(&self, step: &str) -> bool {
        self.latest(step)
            .is_some_and(|entry| entry.status == StepStatus::Completed)
    }

    pub fn latest(&self, step: &str) -> Option<&OperationLogEntry> {
        self.entries.iter().rev().find(|entry| entry.step == step)
    }

    pub fn entries(&self) -> &[OperationLogEntry] {
        &self.entries
    }

    pub fn plan_hash(&self) -> &str {
        &self.header.plan_hash
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
