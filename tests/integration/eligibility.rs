//! Scheduling across waves and dependencies on an exported project

use std::path::Path;

use wavekeeper::fs::state_store::{read_state, write_state};
use wavekeeper::models::state::PlanStatus;
use wavekeeper::scheduler::EligibilityFilter;
use wavekeeper::TrackerError;

use super::helpers::{ctx, Project};

/// Mark a plan verified on disk without running it.
fn set_verified(path: &Path) {
    let mut state = read_state(path).unwrap().unwrap();
    state.status = PlanStatus::Verified;
    write_state(path, &mut state).unwrap();
}

#[test]
fn test_wave_barrier_holds_until_earlier_wave_verified() {
    let project = Project::new();
    let manifest = project.export(&[
        project.source_plan("01-setup", 1, 1, 1),
        project.source_plan("01-setup", 2, 1, 1),
        project.source_plan("02-api", 1, 2, 1),
    ]);
    let tracker = &project.tracker;

    let eligible = tracker.eligible(&ctx("eligible"), &EligibilityFilter::default()).unwrap();
    let waves: Vec<u32> = eligible.iter().map(|entry| entry.wave).collect();
    assert_eq!(waves, vec![1, 1]);

    for entry in manifest.plans.iter().filter(|entry| entry.wave == 1) {
        set_verified(&tracker.state_path(&entry.plan_id));
    }

    let eligible = tracker.eligible(&ctx("eligible"), &EligibilityFilter::default()).unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].phase, "02-api");
}

#[test]
fn test_dependency_by_filename_gates_plan() {
    let project = Project::new();
    let setup = project.source_plan("01-setup", 1, 1, 1);
    let mut docs = project.source_plan("01-setup", 2, 1, 1);
    docs.depends_on = vec!["01-01-PLAN.md".to_string()];
    let manifest = project.export(&[setup, docs]);
    let tracker = &project.tracker;

    let ids: Vec<u32> = tracker
        .eligible(&ctx("eligible"), &EligibilityFilter::default())
        .unwrap()
        .iter()
        .map(|entry| entry.plan_number)
        .collect();
    assert_eq!(ids, vec![1]);

    let first = manifest.plans.iter().find(|e| e.plan_number == 1).unwrap();
    set_verified(&tracker.state_path(&first.plan_id));

    let next = tracker.next_plan(&ctx("next")).unwrap().unwrap();
    assert_eq!(next.plan_number, 2);
}

#[test]
fn test_ambiguous_dependency_is_reported() {
    let project = Project::new();
    let mut api = project.source_plan("02-api", 1, 2, 1);
    // plan number 1 exists in both phases
    api.depends_on = vec!["1".to_string()];
    project.export(&[project.source_plan("01-setup", 1, 1, 1), api]);

    let err = project.tracker.next_plan(&ctx("next")).unwrap_err();
    match err {
        TrackerError::AmbiguousDependency { matches, .. } => assert_eq!(matches.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_filters_narrow_eligible_set() {
    let project = Project::new();
    let manifest = project.export(&[
        project.source_plan("01-setup", 1, 1, 1),
        project.source_plan("01-setup", 2, 1, 1),
    ]);
    let tracker = &project.tracker;
    let wanted = manifest.plans[1].plan_id.clone();

    let filter = EligibilityFilter {
        plan_id: Some(wanted.clone()),
        ..Default::default()
    };
    let eligible = tracker.eligible(&ctx("eligible"), &filter).unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].plan_id, wanted);

    let filter = EligibilityFilter {
        wave: Some(2),
        ..Default::default()
    };
    assert!(tracker.eligible(&ctx("eligible"), &filter).unwrap().is_empty());
}

#[test]
fn test_missing_state_blocks_wave() {
    let project = Project::new();
    let manifest = project.export(&[
        project.source_plan("01-setup", 1, 1, 1),
        project.source_plan("02-api", 1, 2, 1),
    ]);
    let tracker = &project.tracker;

    let setup = &manifest.plans[0];
    std::fs::remove_file(tracker.state_path(&setup.plan_id)).unwrap();

    // wave 1 is still open, so wave 2 waits; the stateless plan is not offered
    let eligible = tracker.eligible(&ctx("eligible"), &EligibilityFilter::default()).unwrap();
    assert!(eligible.is_empty());

    let report = tracker.reconcile(&ctx("reconcile")).unwrap();
    assert_eq!(report.summary["no-state"], 1);
    assert_eq!(report.summary["pending"], 1);
    assert_eq!(
        tracker.read(&tracker.state_path(&manifest.plans[1].plan_id)).unwrap().status,
        PlanStatus::Pending
    );
}
