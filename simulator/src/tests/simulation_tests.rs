//! End-to-end simulation runs
//!
//! These scenarios hold for every allocation policy combined with every
//! provisioning policy, assuming enough resources are booted at t=0; they
//! do not test whether the elasticity policies scale well, only that the
//! simulation reaches the expected terminal state.

use super::test_utils::{build_sim, config_for, fixture, gwf_row};
use crate::sim::SystemSim;

const PROVISION_POLICIES: &[&str] = &["reg", "hist", "conpaas", "react", "token"];
const ALLOCATION_POLICIES: &[&str] = &["bestfit", "worstfit", "fillworstfit"];

fn run_combinations(
    cluster: (&str, u64),
    gwf_rows: &str,
    n_ticks: u64,
    monitor_period: Option<u64>,
    check: impl Fn(&mut SystemSim, &str, &str),
) {
    for &provision_policy in PROVISION_POLICIES {
        for &allocation_policy in ALLOCATION_POLICIES {
            let fx = fixture(&[cluster], gwf_rows);
            let mut config = config_for(&fx, n_ticks, allocation_policy, provision_policy);
            if let Some(period) = monitor_period {
                config.central_queue.n_ticks_monitor_site_status = period;
            }

            let mut sim = SystemSim::new(config).expect("simulator setup");
            sim.run().expect("simulation run");
            check(&mut sim, allocation_policy, provision_policy);
        }
    }
}

#[test]
fn test_bag_of_tasks_same_submit_same_runtime() {
    // five independent tasks, all at t=0, runtime 5, exactly enough
    // resources
    let rows: String = (0..5).map(|i| gwf_row("0", i, 0, 5, 1, "")).collect();

    run_combinations(("test", 5), &rows, 5, None, |sim, allocation, provision| {
        assert_eq!(
            sim.ts_now, 5,
            "clock mismatch for {} and {}",
            provision, allocation
        );
        assert_eq!(
            sim.system_monitor.sstats_total_tasks_finished, 5,
            "expected 5 finished for {} and {}",
            provision, allocation
        );
        assert_eq!(sim.tasks_to_come(), 0);
    });
}

#[test]
fn test_bag_of_tasks_incremental_submit() {
    // five tasks submitted at t=0..4, runtime 5 each
    let rows: String = (0..5).map(|i| gwf_row("0", i, i, 5, 1, "")).collect();

    run_combinations(("test", 5), &rows, 9, None, |sim, allocation, provision| {
        assert_eq!(sim.ts_now, 9, "for {} and {}", provision, allocation);
        assert_eq!(sim.system_monitor.sstats_total_tasks_finished, 5);
        assert_eq!(sim.tasks_to_come(), 0);
    });
}

#[test]
fn test_simple_diamond_workflow() {
    // A, B -> C -> D, E on two resources
    let rows = [
        gwf_row("0", 0, 0, 5, 1, ""),
        gwf_row("0", 1, 0, 5, 1, ""),
        gwf_row("0", 2, 0, 5, 1, "0 1"),
        gwf_row("0", 3, 0, 5, 1, "2"),
        gwf_row("0", 4, 0, 5, 1, "2"),
    ]
    .concat();

    run_combinations(("test", 2), &rows, 15, None, |sim, allocation, provision| {
        assert_eq!(sim.ts_now, 15, "for {} and {}", provision, allocation);
        assert_eq!(sim.system_monitor.sstats_total_tasks_finished, 5);
        assert_eq!(sim.tasks_to_come(), 0);
        assert_eq!(sim.workflows.len(), 1);

        let workflow = sim.workflows.get_mut(&0).unwrap();
        assert!(workflow.workflow_completed(&sim.tasks));
        assert!(workflow.ts_finish.is_some());
    });
}

#[test]
fn test_more_complicated_workflow() {
    // ten tasks in three fan-out/fan-in layers with mixed runtimes
    let rows = [
        gwf_row("0", 0, 0, 1, 1, ""),
        gwf_row("0", 1, 0, 2, 1, "0"),
        gwf_row("0", 2, 0, 3, 1, "1"),
        gwf_row("0", 3, 0, 3, 1, "1"),
        gwf_row("0", 4, 0, 4, 1, "2"),
        gwf_row("0", 5, 0, 4, 1, "2"),
        gwf_row("0", 6, 0, 4, 1, "3"),
        gwf_row("0", 7, 0, 4, 1, "3"),
        gwf_row("0", 8, 0, 2, 1, "4 5 6 7"),
        gwf_row("0", 9, 0, 1, 1, "8"),
    ]
    .concat();

    run_combinations(("test", 4), &rows, 13, Some(1), |sim, allocation, provision| {
        assert_eq!(sim.ts_now, 13, "for {} and {}", provision, allocation);
        assert_eq!(
            sim.system_monitor.sstats_total_tasks_finished, 10,
            "expected 10 finished for {} and {}",
            provision, allocation
        );
        assert_eq!(sim.tasks_to_come(), 0);
        assert_eq!(sim.workflows.len(), 1);
    });
}

#[test]
fn test_run_without_autoscaler() {
    let rows: String = (0..5).map(|i| gwf_row("0", i, 0, 5, 1, "")).collect();
    let fx = fixture(&[("test", 5)], &rows);
    let mut sim = build_sim(&fx, 5, "fillworstfit", "");
    sim.run().unwrap();

    assert_eq!(sim.ts_now, 5);
    assert_eq!(sim.system_monitor.sstats_total_tasks_finished, 5);
    assert_eq!(sim.central_queue.submitted_tasks_count, 5);
    assert_eq!(sim.central_queue.finished_tasks_count, 5);
}

#[test]
fn test_run_leaves_expected_artifacts() {
    let rows: String = (0..2).map(|i| gwf_row("0", i, 0, 5, 1, "")).collect();
    let fx = fixture(&[("test", 2)], &rows);
    let mut sim = build_sim(&fx, 10, "bestfit", "react");
    sim.run().unwrap();

    for artifact in [
        "config.toml",
        "workflows.in",
        "tasks.in",
        "log.db3",
        "stats.db3",
        "tasksdone.db3",
        "tasksin.db3",
        "autoscaler.log",
        "elasticity_metrics.log",
        "cost_metrics.log",
        "elasticity_overview.log",
        "user_metrics.log",
    ] {
        assert!(
            sim.output.join(artifact).is_file(),
            "missing artifact {}",
            artifact
        );
    }

    let user_metrics = std::fs::read_to_string(sim.output.join("user_metrics.log")).unwrap();
    let first_line = user_metrics.lines().next().unwrap();
    let fields: Vec<&str> = first_line.split_whitespace().collect();
    // one completed workflow out of one, plus the throughput column
    assert_eq!(fields[0], "1");
    assert_eq!(fields[1], "1");
    assert_eq!(fields.len(), 3);

    // one line per completed workflow: id makespan response_time cp_length
    let workflow_line = user_metrics.lines().nth(1).unwrap();
    let fields: Vec<&str> = workflow_line.split_whitespace().collect();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0], "0");
    assert_eq!(fields[1], "5");
}
