//! # Merge Pipeline Phases
//!
//! This module contains the implementation of the four phases of a merge.
//! Each phase is a plain function over typed inputs; the
//! [`orchestrator`] wraps them into the entry points a transport layer (the
//! CLI here) drives.
//!
//! ## Phases
//!
//! 1.  **[`analyze`]**: Scan every acquired repository, read lockfiles and
//!     produce the conflict report, cross-dependency graph, hotspots, file
//!     collisions and complexity score.
//! 2.  **[`plan`]**: Turn an analysis into an [`ApplyPlan`](crate::plan::ApplyPlan):
//!     destination names, root manifest, extra files, install command.
//! 3.  **[`apply`]**: Execute a plan into a staging directory step by step,
//!     recording progress in the operation log, then promote it atomically.
//! 4.  **[`verify`]**: Check a plan or a merged directory at the static,
//!     install or full tier.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use log::{Level, log};
use serde::Serialize;

use crate::defaults;
use crate::error::Result;
use crate::git::RetryPolicy;
use crate::repository::RepositoryManager;

pub mod analyze;
pub mod apply;
pub mod orchestrator;
pub mod plan;
pub mod verify;

/// Per-invocation settings shared by every entry point.
///
/// There is no process-wide state; everything a phase needs beyond its own
/// inputs travels here.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Root under which sources are acquired.
    pub work_dir: PathBuf,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new(defaults::default_work_dir())
    }
}

impl PipelineContext {
    pub fn new(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            concurrency: defaults::CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a fresh, uniquely named directory for one acquisition run.
    ///
    /// Plans reference sources by absolute path, so every run gets its own
    /// directory and earlier plans keep pointing at their own copies.
    pub fn create_run_dir(&self) -> Result<PathBuf> {
        let dir = self
            .work_dir
            .join(format!("run-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// A repository manager configured from this context.
    pub fn repository_manager(&self, target_root: PathBuf) -> RepositoryManager {
        RepositoryManager::new(target_root)
            .with_retry(self.retry)
            .with_concurrency(self.concurrency)
    }
}

/// One item of the event stream an entry point produces.
///
/// Every entry point emits zero or more `Log` events, then exactly one
/// `Result` or `Error`, then exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Log { level: String, message: String },
    Result { payload: serde_json::Value },
    Error { message: String },
    Done,
}

/// Receiver of pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl EventSink for Mutex<Sender<Event>> {
    fn emit(&self, event: Event) {
        // A dropped receiver only means nobody is listening any more.
        if let Ok(sender) = self.lock() {
            let _ = sender.send(event);
        }
    }
}

/// Log through the `log` facade and forward the line to `sink`.
pub(crate) fn emit_log(sink: &dyn EventSink, level: Level, message: impl Into<String>) {
    let message = message.into();
    log!(level, "{}", message);
    sink.emit(Event::Log {
        level: level.as_str().to_ascii_lowercase(),
        message,
    });
}
