//! Full plan lifecycles: start, progress, verification and recovery

use std::fs;

use wavekeeper::lifecycle::{VerificationInput, UNLOCK_REASON};
use wavekeeper::models::state::{Cursor, PlanStatus, RecoveryEvent, VerifyTier};
use wavekeeper::scheduler::EligibilityFilter;
use wavekeeper::{ErrorCategory, TrackerError};

use super::helpers::{ctx, executor, Project};

fn passing(tier: VerifyTier) -> VerificationInput {
    VerificationInput {
        tier,
        command: "cargo test".to_string(),
        exit_code: 0,
        log_path: None,
    }
}

#[test]
fn test_two_wave_project_runs_to_completion() {
    let project = Project::new();
    let mut api = project.source_plan("02-api", 1, 2, 1);
    api.depends_on = vec!["01-setup-01".to_string()];
    let setup = project.source_plan("01-setup", 1, 1, 2);
    let manifest = project.export(&[api, setup]);
    let tracker = &project.tracker;

    let next = tracker.next_plan(&ctx("next")).unwrap().unwrap();
    assert_eq!(next.phase, "01-setup");

    let setup_path = project.state_path(&manifest, "01-setup");
    let state = tracker.start(&ctx("start"), &setup_path, executor("run-1")).unwrap();
    assert_eq!(state.status, PlanStatus::Executing);
    assert_eq!(state.lease.as_ref().unwrap().run_id, "run-1");

    // an executing plan is no longer offered
    assert!(tracker.next_plan(&ctx("next")).unwrap().is_none());

    tracker.complete_task(&ctx("complete"), &setup_path, 1).unwrap();
    let state = tracker.complete_task(&ctx("complete"), &setup_path, 2).unwrap();
    assert_eq!(state.cursor, Some(Cursor::new(2, Cursor::ALL_DONE)));

    let state = tracker
        .record_verification(&ctx("verify"), &setup_path, passing(VerifyTier::Quick))
        .unwrap();
    let log_path = &state.verification[&VerifyTier::Quick][0].log_path;
    assert!(tracker.layout().resolve(log_path).exists());

    let state = tracker.mark_verified(&ctx("verified"), &setup_path).unwrap();
    assert_eq!(state.status, PlanStatus::Verified);
    assert!(state.lease.is_none());

    let manifest = tracker.refresh(&ctx("refresh")).unwrap();
    assert_eq!(manifest.summary["verified"], 1);
    assert_eq!(manifest.summary["pending"], 1);

    let next = tracker.next_plan(&ctx("next")).unwrap().unwrap();
    assert_eq!(next.phase, "02-api");
}

#[test]
fn test_mark_verified_requires_results() {
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, 1)]);
    let path = project.state_path(&manifest, "01-setup");
    let tracker = &project.tracker;

    tracker.start(&ctx("start"), &path, executor("run-1")).unwrap();
    tracker.complete_task(&ctx("complete"), &path, 1).unwrap();

    let err = tracker.mark_verified(&ctx("verified"), &path).unwrap_err();
    assert!(matches!(err, TrackerError::VerificationPrecondition { .. }));
    assert_eq!(err.category(), ErrorCategory::Logic);
    assert_eq!(tracker.read(&path).unwrap().status, PlanStatus::Executing);
}

#[test]
fn test_failed_plan_resumes_under_new_run() {
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, 2)]);
    let path = project.state_path(&manifest, "01-setup");
    let tracker = &project.tracker;

    tracker.start(&ctx("start"), &path, executor("run-1")).unwrap();
    tracker.complete_task(&ctx("complete"), &path, 1).unwrap();
    let state = tracker.mark_failed(&ctx("failed"), &path, "tests broke").unwrap();
    assert_eq!(state.status, PlanStatus::Failed);
    assert_eq!(state.failure_reason.as_deref(), Some("tests broke"));

    let state = tracker.resume(&ctx("resume"), &path, executor("run-2")).unwrap();
    assert_eq!(state.status, PlanStatus::Executing);
    assert!(state.failure_reason.is_none());
    assert_eq!(state.completed_tasks.len(), 1);
    assert_eq!(state.lease.as_ref().unwrap().run_id, "run-2");
    // failing released the lease, so nothing was handed off
    assert!(state.recovery_notes.is_empty());

    // the previous run can no longer extend the lease
    let err = tracker.renew_lease(&ctx("renew"), &path, "run-1").unwrap_err();
    assert!(matches!(err, TrackerError::LeaseMismatch { .. }));
}

#[test]
fn test_blocked_plan_is_not_eligible_until_resumed() {
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, 1)]);
    let path = project.state_path(&manifest, "01-setup");
    let tracker = &project.tracker;

    tracker.start(&ctx("start"), &path, executor("run-1")).unwrap();
    let state = tracker
        .mark_blocked(&ctx("blocked"), &path, "waiting on credentials", "medium")
        .unwrap();
    assert_eq!(state.status, PlanStatus::Blocked);
    tracker.refresh(&ctx("refresh")).unwrap();

    let eligible = tracker.eligible(&ctx("eligible"), &EligibilityFilter::default()).unwrap();
    assert!(eligible.is_empty());

    let state = tracker.resume(&ctx("resume"), &path, executor("run-2")).unwrap();
    assert!(state.blocked_reason.is_none());
    assert!(state.blocked_severity.is_none());
    assert_eq!(state.recovery_notes.len(), 1);
    assert_eq!(state.recovery_notes[0].event, RecoveryEvent::LeaseHandoff);
    assert_eq!(state.recovery_notes[0].previous_run_id, "run-1");
}

#[test]
fn test_edited_source_stops_start() {
    let project = Project::new();
    let parsed = project.source_plan("01-setup", 1, 1, 1);
    let manifest = project.export(std::slice::from_ref(&parsed));
    let path = project.state_path(&manifest, "01-setup");

    fs::write(project.root().join(&parsed.source_path), "# rewritten\n").unwrap();

    let err = project
        .tracker
        .start(&ctx("start"), &path, executor("run-1"))
        .unwrap_err();
    assert!(matches!(err, TrackerError::SourceDrift { .. }));
    assert_eq!(err.category(), ErrorCategory::Drift);
    assert_eq!(project.tracker.read(&path).unwrap().status, PlanStatus::Pending);

    let report = project.tracker.reconcile(&ctx("reconcile")).unwrap();
    assert_eq!(report.drift_warnings.len(), 1);
}

#[test]
fn test_unlock_hands_stuck_plan_to_fresh_run() {
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, 1)]);
    let path = project.state_path(&manifest, "01-setup");
    let tracker = &project.tracker;

    tracker.start(&ctx("start"), &path, executor("stuck")).unwrap();
    let state = tracker.force_unlock(&ctx("unlock"), &path).unwrap();

    assert_eq!(state.status, PlanStatus::Executing);
    let lease = state.lease.as_ref().unwrap();
    assert_ne!(lease.run_id, "stuck");
    let executor = state.executor.as_ref().unwrap();
    assert_eq!(executor.tool.as_deref(), Some("codex"));
    assert_eq!(executor.run_id.as_deref(), Some(lease.run_id.as_str()));
    // the interim failure is cleared again by the resume
    assert!(state.failure_reason.is_none());
}

#[test]
fn test_unlock_refuses_verified_plan() {
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, 1)]);
    let path = project.state_path(&manifest, "01-setup");
    let tracker = &project.tracker;

    tracker.start(&ctx("start"), &path, executor("run-1")).unwrap();
    tracker.complete_task(&ctx("complete"), &path, 1).unwrap();
    tracker
        .record_verification(&ctx("verify"), &path, passing(VerifyTier::Smoke))
        .unwrap();
    tracker.mark_verified(&ctx("verified"), &path).unwrap();

    let err = tracker.force_unlock(&ctx("unlock"), &path).unwrap_err();
    assert!(matches!(err, TrackerError::WrongStatus { .. }));
    let state = tracker.read(&path).unwrap();
    assert_eq!(state.status, PlanStatus::Verified);
    assert_ne!(state.failure_reason.as_deref(), Some(UNLOCK_REASON));
}
