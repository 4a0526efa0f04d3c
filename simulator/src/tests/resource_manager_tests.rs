//! Tests for capacity queries, best-effort provisioning and the shutdown
//! protocol

use super::test_utils::{build_sim, fixture, gwf_row};
use crate::site::SiteStatus;
use crate::task::TaskStatus;

#[test]
fn test_setup_provisions_the_whole_catalog() {
    let fx = fixture(&[("c2", 2), ("c3", 3), ("c5", 5)], "");
    let sim = build_sim(&fx, 10, "fillworstfit", "");

    assert_eq!(sim.sites.len(), 3);
    assert_eq!(sim.get_current_capacity(), 10);
    assert_eq!(sim.get_maximum_capacity().unwrap(), 10);
    assert_eq!(sim.central_queue.index.total_available_resources, 10);
}

#[test]
fn test_maximum_capacity_is_undefined_with_duplicates() {
    let fx = fixture(&[("c2", 2)], "");
    let mut sim = build_sim(&fx, 10, "fillworstfit", "");

    sim.resource_manager.allow_duplicates = true;
    assert!(sim.get_maximum_capacity().is_err());
}

#[test]
fn test_release_finds_an_exact_subset() {
    let fx = fixture(&[("c2", 2), ("c3", 3), ("c5", 5)], "");
    let mut sim = build_sim(&fx, 10, "fillworstfit", "");

    let released = sim.release_resources_best_effort(5, true, false).unwrap();
    assert_eq!(released, 5);
    assert_eq!(sim.get_current_capacity(), 5);

    let shutdown = sim
        .sites
        .values()
        .filter(|site| site.status == SiteStatus::Shutdown)
        .count();
    assert_eq!(shutdown, 2);
}

#[test]
fn test_release_rounds_down_when_no_exact_subset() {
    let fx = fixture(&[("c2", 2), ("c3", 3), ("c5", 5)], "");
    let mut sim = build_sim(&fx, 10, "fillworstfit", "");

    // no idle subset sums to 4; the closest below is 3
    let released = sim.release_resources_best_effort(4, true, false).unwrap();
    assert_eq!(released, 3);
    assert_eq!(sim.get_current_capacity(), 7);
}

#[test]
fn test_released_sites_are_dropped_and_restartable() {
    let fx = fixture(&[("c2", 2), ("c3", 3), ("c5", 5)], "");
    let mut sim = build_sim(&fx, 10, "fillworstfit", "");

    assert_eq!(sim.release_resources_best_effort(5, true, false).unwrap(), 5);

    // a shutdown site is reaped at the next statistics refresh and only
    // then becomes provisionable again
    assert_eq!(sim.start_up_best_effort(5, false).unwrap(), 0);
    sim.sysmon_refresh_sstats().unwrap();
    assert_eq!(sim.sites.len(), 1);

    assert_eq!(sim.start_up_best_effort(5, false).unwrap(), 5);
    assert_eq!(sim.get_current_capacity(), 10);
}

#[test]
fn test_fix_capacity_commits_only_on_exact_match() {
    let fx = fixture(&[("c2", 2), ("c3", 3), ("c5", 5)], "");
    let mut sim = build_sim(&fx, 10, "fillworstfit", "");

    sim.release_resources_best_effort(10, true, false).unwrap();
    sim.sysmon_refresh_sstats().unwrap();
    assert_eq!(sim.sites.len(), 0);

    assert_eq!(sim.start_up_best_effort(4, true).unwrap(), 0);
    assert_eq!(sim.start_up_best_effort(5, true).unwrap(), 5);
}

#[test]
fn test_busy_sites_are_not_released_when_only_idle() {
    let rows: String = (0..2).map(|i| gwf_row("", i, 0, 100, 1, "")).collect();
    let fx = fixture(&[("c2", 2)], &rows);
    let mut sim = build_sim(&fx, 5, "fillworstfit", "");

    sim.start(5).unwrap();
    assert!(!sim.sites.values().next().unwrap().is_idle());

    assert_eq!(sim.release_resources_best_effort(2, true, false).unwrap(), 0);
    assert_eq!(sim.get_current_capacity(), 2);
}

#[test]
fn test_shutdown_interrupts_and_resubmits_tasks() {
    let rows: String = (0..3).map(|i| gwf_row("", i, 0, 100, 1, "")).collect();
    let fx = fixture(&[("c2", 2)], &rows);
    let mut sim = build_sim(&fx, 5, "fillworstfit", "");

    // run up to the horizon: two tasks running, one queued at the queue
    sim.start(5).unwrap();
    let site_id = *sim.sites.keys().next().unwrap();
    assert_eq!(sim.sites[&site_id].running_tasks.len(), 2);
    assert_eq!(sim.central_queue.submitted_tasks_count, 2);

    let released = sim.stop_site(site_id).unwrap();
    assert_eq!(released, 2);

    let site = &sim.sites[&site_id];
    assert_eq!(site.status, SiteStatus::Shutdown);
    assert_eq!(site.used_resources, 0);
    assert!(site.running_tasks.is_empty());

    // interrupted tasks are back to SUBMITTED and in the central queue
    for id in 0..2 {
        let task = sim.tasks.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Submitted);
        assert_eq!(task.running_site, None);
    }
    assert_eq!(sim.central_queue.submitted_tasks_count, 0);
    assert_eq!(sim.tasks_to_come(), 3);

    // the registry entry survives until the next statistics refresh
    assert!(sim.registry.get_entity_by_id(site_id).unwrap().is_some());
    sim.sysmon_refresh_sstats().unwrap();
    assert!(sim.registry.get_entity_by_id(site_id).unwrap().is_none());
    assert!(sim.sites.is_empty());
}

#[test]
fn test_start_smallest_available_site() {
    let fx = fixture(&[("c2", 2), ("c5", 5)], "");
    let mut sim = build_sim(&fx, 10, "fillworstfit", "");

    sim.release_resources_best_effort(7, true, false).unwrap();
    sim.sysmon_refresh_sstats().unwrap();
    assert_eq!(sim.get_current_capacity(), 0);

    assert_eq!(sim.start_smallest_available_site(None).unwrap(), 2);
    assert_eq!(sim.start_smallest_available_site(Some(3)).unwrap(), 5);
    assert_eq!(sim.start_smallest_available_site(None).unwrap(), 0);
}
