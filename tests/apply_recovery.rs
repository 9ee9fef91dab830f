//! Integration tests for interrupted applies: a failed or cancelled apply
//! never touches the output directory, and rerunning the same plan resumes
//! from the last completed step.

mod common;

use common::prelude::*;
use monorepo_merge::cancel::CancelToken;
use monorepo_merge::oplog::{OperationLog, StepStatus};
use monorepo_merge::phases::apply::{self, ApplyOptions};
use monorepo_merge::phases::plan::PlanOptions;
use monorepo_merge::phases::{NullSink, PipelineContext, orchestrator};
use monorepo_merge::plan;
use std::fs;
use std::path::{Path, PathBuf};

/// Staging directories and logs left next to `output_dir`.
fn leftovers(parent: &Path, output_name: &str) -> Vec<PathBuf> {
    let prefix = format!(".{}.staging-", output_name);
    let mut found: Vec<PathBuf> = fs::read_dir(parent)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(&prefix))
        })
        .collect();
    found.sort();
    found
}

fn write_plan(fixture: &TestFixture, options: &PlanOptions) -> PathBuf {
    let plan_path = fixture.path().join("plan.json");
    orchestrator::run_plan(
        &PipelineContext::new(fixture.work_dir()),
        &[fixture.repo("web"), fixture.repo("api")],
        options,
        &plan_path,
        &NullSink,
    )
    .unwrap();
    plan_path
}

fn fixture() -> TestFixture {
    TestFixture::new()
        .with_repo("web", manifests::LODASH_OLD)
        .with_repo("api", manifests::LODASH_NEW)
}

#[test]
fn test_cancelled_apply_leaves_nothing_behind() {
    let fixture = fixture();
    let plan_path = write_plan(
        &fixture,
        &PlanOptions {
            install: false,
            ..PlanOptions::default()
        },
    );
    let output_dir = fixture.path().join("merged");
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = apply::execute(
        &ApplyOptions {
            plan_path: plan_path.clone(),
            output_dir: output_dir.clone(),
        },
        &cancel,
        &NullSink,
    )
    .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!output_dir.exists());
    assert!(leftovers(fixture.path(), "merged").is_empty());

    // The sources were never moved, so a fresh run succeeds.
    let loaded = plan::read_plan(&plan_path).unwrap();
    assert!(loaded.plan.sources.iter().all(|s| s.path.is_dir()));
    apply::execute(
        &ApplyOptions {
            plan_path,
            output_dir: output_dir.clone(),
        },
        &CancelToken::new(),
        &NullSink,
    )
    .unwrap();
    assert!(output_dir.join("packages/web/package.json").is_file());
}

#[cfg(unix)]
#[test]
fn test_failed_install_keeps_output_and_resumes() {
    let fixture = fixture();
    let marker = fixture.path().join("install-ok");
    let plan_path = write_plan(
        &fixture,
        &PlanOptions {
            install_command: Some(format!("test -f '{}'", marker.display())),
            ..PlanOptions::default()
        },
    );
    let loaded = plan::read_plan(&plan_path).unwrap();

    let output_dir = fixture.path().join("merged");
    fixture.child("merged/keep.txt").write_str("previous").unwrap();
    let options = ApplyOptions {
        plan_path: plan_path.clone(),
        output_dir: output_dir.clone(),
    };

    let err = apply::execute(&options, &CancelToken::new(), &NullSink).unwrap_err();
    assert!(err.to_string().contains("install"), "{}", err);

    // The previous output is untouched and nothing new appeared in it.
    assert_eq!(
        fs::read_to_string(output_dir.join("keep.txt")).unwrap(),
        "previous"
    );
    assert!(!output_dir.join("package.json").exists());

    // Sources were consumed, so the staging directory and its log remain.
    let left = leftovers(fixture.path(), "merged");
    let log_path = left
        .iter()
        .find(|p| p.to_string_lossy().ends_with(".oplog.jsonl"))
        .unwrap()
        .clone();
    let log = OperationLog::open_or_create(&log_path, &loaded.hash).unwrap();
    assert!(log.is_completed("move-packages"));
    assert_eq!(log.latest("install").unwrap().status, StepStatus::Failed);
    drop(log);

    fs::write(&marker, "").unwrap();
    let result = apply::execute(&options, &CancelToken::new(), &NullSink).unwrap();
    assert_eq!(
        result.skipped_steps,
        vec!["scaffold", "move-packages", "write-root", "write-extras"]
    );
    assert!(output_dir.join("package.json").is_file());
    assert!(output_dir.join("packages/api/package.json").is_file());
    assert!(!output_dir.join("keep.txt").exists());
    assert!(leftovers(fixture.path(), "merged").is_empty());
}

#[test]
fn test_changed_plan_does_not_resume() {
    let fixture = fixture();
    let plan_path = write_plan(
        &fixture,
        &PlanOptions {
            install: false,
            ..PlanOptions::default()
        },
    );

    // A staging directory from some other plan.
    let stale = fixture.path().join(".merged.staging-0000");
    fs::create_dir_all(stale.join("packages")).unwrap();
    let stale_log = fixture.path().join(".merged.staging-0000.oplog.jsonl");
    OperationLog::open_or_create(&stale_log, "not-this-plan").unwrap();

    let output_dir = fixture.path().join("merged");
    let result = apply::execute(
        &ApplyOptions {
            plan_path,
            output_dir: output_dir.clone(),
        },
        &CancelToken::new(),
        &NullSink,
    )
    .unwrap();
    assert!(result.skipped_steps.is_empty());
    assert!(output_dir.join("packages/web/package.json").is_file());
    assert!(stale.is_dir());
}
