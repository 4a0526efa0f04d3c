//! Tests for the task lifecycle and the arena

use crate::task::{Task, TaskArena, TaskStatus};
use std::collections::BTreeSet;

fn task(id: u64, runtime: i64, cpus: i64) -> Task {
    Task::new(id, 0, 0, runtime, cpus, BTreeSet::new(), None)
}

#[test]
fn test_task_initialisation() {
    let task = Task::new(7, 1337, 0, 42, 1000, BTreeSet::new(), None);
    assert_eq!(task.id, 7);
    assert_eq!(task.ts_submit, 1337);
    assert_eq!(task.runtime, 42);
    assert_eq!(task.cpus, 1000);
    assert_eq!(task.status, TaskStatus::Submitted);
    assert_eq!(task.running_site, None);
    assert_eq!(task.ts_start, None);
    assert_eq!(task.ts_end, None);
}

#[test]
fn test_non_positive_runtime_is_clamped() {
    assert_eq!(task(0, -1, 1).runtime, 1);
    assert_eq!(task(0, 0, 1).runtime, 1);
}

#[test]
fn test_non_positive_cpus_are_clamped() {
    assert_eq!(task(0, 42, -1).cpus, 1);
    assert_eq!(task(0, 42, 0).cpus, 1);
}

#[test]
fn test_lifecycle_submitted_queued_running_finished() {
    let mut task = task(1, 10, 2);

    task.queue_at_site(4);
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.running_site, Some(4));

    task.run(3, 13);
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.ts_start, Some(3));
    assert_eq!(task.ts_end, Some(13));

    task.stop();
    assert!(task.is_finished());
}

#[test]
fn test_interrupt_reverts_scheduling_state() {
    let mut task = task(1, 10, 2);
    task.queue_at_site(4);
    task.run(3, 13);

    task.interrupt();
    assert_eq!(task.status, TaskStatus::Submitted);
    assert_eq!(task.running_site, None);
    assert_eq!(task.ts_start, None);
    assert_eq!(task.ts_end, None);
}

#[test]
fn test_arena_lookup() {
    let mut arena = TaskArena::new();
    arena.insert(task(3, 5, 1));
    arena.insert(task(9, 5, 1));

    assert_eq!(arena.len(), 2);
    assert!(arena.contains(3));
    assert!(!arena.contains(4));
    assert_eq!(arena.get(9).unwrap().id, 9);
    assert!(arena.get(4).is_none());

    arena.get_mut(3).unwrap().stop();
    assert!(arena.get(3).unwrap().is_finished());
}

#[test]
fn test_arena_require_flags_missing_ids() {
    let mut arena = TaskArena::new();
    arena.insert(task(3, 5, 1));

    assert!(arena.require(3).is_ok());
    assert!(arena.require(4).is_err());
    assert!(arena.require_mut(4).is_err());
}
