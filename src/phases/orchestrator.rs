//! Entry points for the merge pipeline
//!
//! Each `run_*` function drives one phase end to end and reports through an
//! [`EventSink`]: zero or more `Log` events, then exactly one `Result` or
//! `Error`, then exactly one `Done`. The typed result is returned as well,
//! so in-process callers do not have to decode the event stream.

use std::path::{Path, PathBuf};

use log::Level;
use serde::Serialize;

use super::analyze::{self, AnalysisReport};
use super::apply::{self, ApplyOptions, ApplyResult};
use super::plan::{self as planner, PlanOptions};
use super::verify::{self, VerifyResult, VerifyTarget, VerifyTier};
use super::{EventSink, Event, PipelineContext, emit_log};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::plan::{self, ApplyPlan};
use crate::repository::AcquiredRepo;

/// Where a written plan ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub plan_path: PathBuf,
    pub plan_hash: String,
    pub plan: ApplyPlan,
}

/// What `run_verify` checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifySubject {
    Plan(PathBuf),
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    pub subject: VerifySubject,
    pub tier: VerifyTier,
}

/// Emit the terminal events for `result` and hand it back.
fn finish<T: Serialize>(sink: &dyn EventSink, result: Result<T>) -> Result<T> {
    match &result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(payload) => sink.emit(Event::Result { payload }),
            Err(e) => sink.emit(Event::Error {
                message: e.to_string(),
            }),
        },
        Err(e) => sink.emit(Event::Error {
            message: e.to_string(),
        }),
    }
    sink.emit(Event::Done);
    result
}

fn acquire(ctx: &PipelineContext, sources: &[String], sink: &dyn EventSink) -> Result<Vec<AcquiredRepo>> {
    let run_dir = ctx.create_run_dir()?;
    emit_log(
        sink,
        Level::Info,
        format!("Acquiring {} sources into {}", sources.len(), run_dir.display()),
    );
    ctx.repository_manager(run_dir).acquire_all(sources)
}

/// Acquire `sources` and analyze them.
pub fn run_analyze(
    ctx: &PipelineContext,
    sources: &[String],
    sink: &dyn EventSink,
) -> Result<AnalysisReport> {
    let result = acquire(ctx, sources, sink).and_then(|repos| analyze::execute(&repos, sink));
    finish(sink, result)
}

/// Acquire `sources`, analyze them and write the plan to `plan_path`.
pub fn run_plan(
    ctx: &PipelineContext,
    sources: &[String],
    options: &PlanOptions,
    plan_path: &Path,
    sink: &dyn EventSink,
) -> Result<PlanOutcome> {
    let result = (|| -> Result<PlanOutcome> {
        let repos = acquire(ctx, sources, sink)?;
        let report = analyze::execute(&repos, sink)?;
        let plan = planner::execute(&repos, &report, options, sink)?;
        let plan_hash = plan::write_plan(plan_path, &plan)?;
        emit_log(
            sink,
            Level::Info,
            format!("Wrote plan {} ({})", plan_path.display(), &plan_hash[..12]),
        );
        Ok(PlanOutcome {
            plan_path: plan_path.to_path_buf(),
            plan_hash,
            plan,
        })
    })();
    finish(sink, result)
}

/// Apply a plan. Acquisition directories left empty by the move are
/// removed afterwards.
pub fn run_apply(
    ctx: &PipelineContext,
    options: &ApplyOptions,
    cancel: &CancelToken,
    sink: &dyn EventSink,
) -> Result<ApplyResult> {
    let source_parents: Vec<PathBuf> = plan::read_plan(&options.plan_path)
        .map(|loaded| {
            loaded
                .plan
                .sources
                .iter()
                .filter_map(|s| s.path.parent().map(Path::to_path_buf))
                .collect()
        })
        .unwrap_or_default();

    let result = apply::execute(options, cancel, sink);
    if result.is_ok() {
        for dir in source_parents {
            if dir.starts_with(&ctx.work_dir)
                && std::fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_none())
            {
                crate::filesystem::remove_best_effort(&dir);
            }
        }
    }
    finish(sink, result)
}

/// Verify a plan file or a merged directory.
///
/// Full-tier scripts run on a pool of `ctx.concurrency` threads.
pub fn run_verify(
    ctx: &PipelineContext,
    options: &VerifyOptions,
    sink: &dyn EventSink,
) -> Result<VerifyResult> {
    let result = (|| -> Result<VerifyResult> {
        let cancel = CancelToken::new();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.concurrency)
            .build()?;
        match &options.subject {
            VerifySubject::Plan(path) => {
                let loaded = plan::read_plan(path)?;
                pool.install(|| verify::execute(VerifyTarget::Plan(&loaded.plan), options.tier, &cancel, sink))
            }
            VerifySubject::Directory(dir) => {
                pool.install(|| verify::execute(VerifyTarget::Directory(dir), options.tier, &cancel, sink))
            }
        }
    })();
    finish(sink, result)
}
