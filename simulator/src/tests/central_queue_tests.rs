//! Tests for central-queue admission, promotion and the site-stat index

use crate::central_queue::{CentralQueue, SiteStat, SiteStatIndex};
use crate::task::{Task, TaskArena};
use shared::config::CentralQueueConfig;
use std::collections::BTreeSet;

fn queue() -> CentralQueue {
    CentralQueue::new(0, &CentralQueueConfig::default())
}

fn arena_with_tasks(specs: &[(u64, u64, &[u64])]) -> (TaskArena, Vec<u64>) {
    let mut arena = TaskArena::new();
    let mut ids = Vec::new();
    for &(id, ts_submit, deps) in specs {
        let dependencies: BTreeSet<u64> = deps.iter().copied().collect();
        arena.insert(Task::new(id, ts_submit, 0, 5, 1, dependencies, None));
        ids.push(id);
    }
    (arena, ids)
}

fn stat(site_id: usize, free: i64) -> SiteStat {
    SiteStat {
        free_resources: free,
        site_name: format!("site{}", site_id),
        site_id,
        is_leased: false,
        expiration_ts: 0,
    }
}

#[test]
fn test_admission_partitions_by_dependencies() {
    let mut cq = queue();
    let (mut arena, ids) = arena_with_tasks(&[(0, 0, &[]), (1, 3, &[]), (2, 0, &[0])]);

    cq.set_task_list(&mut arena, &ids, false);

    assert_eq!(cq.submitted_future_tasks().count(), 2);
    assert_eq!(cq.pending_dependency_tasks().count(), 1);
    assert_eq!(cq.ready_count(), 0);
    assert!(cq.check_partition());
}

#[test]
fn test_first_submission_at_zero_shifts_everything() {
    let mut cq = queue();
    let (mut arena, ids) = arena_with_tasks(&[(0, 100, &[]), (1, 130, &[])]);

    cq.set_task_list(&mut arena, &ids, true);

    assert_eq!(arena.get(0).unwrap().ts_submit, 0);
    assert_eq!(arena.get(1).unwrap().ts_submit, 30);
}

#[test]
fn test_promotion_moves_only_due_tasks() {
    let mut cq = queue();
    let (mut arena, ids) = arena_with_tasks(&[(0, 0, &[]), (1, 5, &[]), (2, 9, &[])]);
    cq.set_task_list(&mut arena, &ids, false);

    assert_eq!(cq.tasks_to_schedule(0), vec![0]);
    assert_eq!(cq.tasks_to_schedule(5), vec![0, 1]);
    assert_eq!(cq.tasks_to_schedule(100), vec![0, 1, 2]);
    assert!(cq.check_partition());
}

#[test]
fn test_dependency_release_goes_through_future() {
    let mut cq = queue();
    let (mut arena, ids) = arena_with_tasks(&[(0, 0, &[]), (1, 0, &[0])]);
    cq.set_task_list(&mut arena, &ids, false);

    assert_eq!(cq.tasks_to_schedule(0), vec![0]);

    // parent finishes: dependency drains, the child becomes promotable
    arena.get_mut(1).unwrap().dependencies.remove(&0);
    cq.promote_dependency_free(0, 1);

    assert_eq!(cq.pending_dependency_tasks().count(), 0);
    assert_eq!(cq.tasks_to_schedule(0), vec![0, 1]);
}

#[test]
fn test_next_task_prefers_ready_over_queued() {
    let mut cq = queue();
    let (mut arena, ids) = arena_with_tasks(&[(0, 2, &[]), (1, 8, &[])]);
    cq.set_task_list(&mut arena, &ids, false);

    assert_eq!(cq.ts_of_next_task(), Some(2));

    cq.tasks_to_schedule(2);
    assert_eq!(cq.ts_of_next_task(), Some(2));

    cq.remove_ready(2, 0);
    assert_eq!(cq.ts_of_next_task(), Some(8));
}

#[test]
fn test_resubmission_decrements_submitted_count() {
    let mut cq = queue();
    let (mut arena, ids) = arena_with_tasks(&[(0, 0, &[]), (1, 0, &[])]);
    cq.set_task_list(&mut arena, &ids, false);

    cq.submitted_tasks_count = 2;
    cq.tasks_to_schedule(0);
    cq.remove_ready(0, 0);
    cq.remove_ready(0, 1);

    cq.extend_task_list(&arena, &ids);
    assert_eq!(cq.submitted_tasks_count, 0);
    assert_eq!(cq.tasks_to_schedule(0), vec![0, 1]);
}

#[test]
fn test_index_add_set_remove_stays_consistent() {
    let mut index = SiteStatIndex::new();
    index.add(stat(10, 4));
    index.add(stat(11, 2));
    index.add(stat(12, 8));

    assert_eq!(index.len(), 3);
    assert_eq!(index.total_available_resources, 14);
    assert!(index.check_consistency());

    let slot = index.slot_of_site(11).unwrap();
    index.set_free_resources(slot, 6);
    assert_eq!(index.total_available_resources, 18);
    assert!(index.check_consistency());

    index.remove_site(10);
    assert_eq!(index.len(), 2);
    assert_eq!(index.total_available_resources, 14);
    assert!(index.check_consistency());
    assert!(!index.contains_site(10));
}

#[test]
fn test_index_bisect_from_free() {
    let mut index = SiteStatIndex::new();
    index.add(stat(10, 4));
    index.add(stat(11, 2));
    index.add(stat(12, 8));

    let frees: Vec<i64> = index.iter_from_free(4).map(|(_, s)| s.free_resources).collect();
    assert_eq!(frees, vec![4, 8]);

    let frees: Vec<i64> = index.iter_from_free(5).map(|(_, s)| s.free_resources).collect();
    assert_eq!(frees, vec![8]);

    assert_eq!(index.iter_from_free(9).count(), 0);
}

#[test]
fn test_index_descending_order_breaks_ties_by_insertion() {
    let mut index = SiteStatIndex::new();
    index.add(stat(10, 4)); // slot 0
    index.add(stat(11, 4)); // slot 1
    index.add(stat(12, 9)); // slot 2

    let order: Vec<usize> = index.slots_by_descending_free();
    assert_eq!(order, vec![2, 0, 1]);
}

#[test]
fn test_index_negative_free_resources_sort_first() {
    let mut index = SiteStatIndex::new();
    index.add(stat(10, -3));
    index.add(stat(11, 1));

    assert_eq!(index.total_available_resources, -2);
    let frees: Vec<i64> = index.iter_from_free(0).map(|(_, s)| s.free_resources).collect();
    assert_eq!(frees, vec![1]);
}
