//! Concurrent writers against one state file

use std::sync::{Arc, Barrier};
use std::thread;

use serial_test::serial;
use wavekeeper::fs::locking::lock_path_for;
use wavekeeper::models::state::PlanStatus;

use super::helpers::{ctx, executor, Project};

#[test]
#[serial]
fn test_parallel_task_completions_are_not_lost() {
    const TASKS: u32 = 8;
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, TASKS)]);
    let path = project.state_path(&manifest, "01-setup");
    project
        .tracker
        .start(&ctx("start"), &path, executor("run-1"))
        .unwrap();

    let barrier = Arc::new(Barrier::new(TASKS as usize));
    thread::scope(|scope| {
        for task in 1..=TASKS {
            let barrier = Arc::clone(&barrier);
            let tracker = &project.tracker;
            let path = &path;
            scope.spawn(move || {
                barrier.wait();
                tracker.complete_task(&ctx("complete"), path, task).unwrap();
            });
        }
    });

    let state = project.tracker.read(&path).unwrap();
    assert_eq!(state.status, PlanStatus::Executing);
    assert_eq!(state.completed_tasks.len(), TASKS as usize);
    assert!(!lock_path_for(&path).exists());
}

#[test]
#[serial]
fn test_second_start_is_refused_while_lease_active() {
    let project = Project::new();
    let manifest = project.export(&[project.source_plan("01-setup", 1, 1, 1)]);
    let path = project.state_path(&manifest, "01-setup");

    let outcomes: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = ["run-a", "run-b"]
            .into_iter()
            .map(|run_id| {
                let tracker = &project.tracker;
                let path = &path;
                scope.spawn(move || tracker.start(&ctx("start"), path, executor(run_id)).is_ok())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let state = project.tracker.read(&path).unwrap();
    assert_eq!(state.status, PlanStatus::Executing);
    assert!(state.recovery_notes.is_empty());
}
