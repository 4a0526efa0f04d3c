//! Tests for the elasticity policies and their KPI logs

use super::test_utils::{build_sim, fixture, gwf_row};
use crate::autoscaler::{
    token, AutoscalerCore, HistPolicy, ReactPolicy, ScalingPolicy, TokenPolicy,
};

fn core_for(sim: &crate::sim::SystemSim) -> AutoscalerCore {
    AutoscalerCore::new(&sim.output, &sim.config.autoscaler).expect("autoscaler core")
}

#[test]
fn test_react_upscales_when_load_reaches_capacity() {
    // load 6 (three 2-cpu tasks) against capacity 5, nothing provisionable
    let rows: String = (0..3).map(|i| gwf_row("", i, 0, 10, 2, "")).collect();
    let fx = fixture(&[("c5", 5)], &rows);
    let mut sim = build_sim(&fx, 100, "fillworstfit", "");
    let mut core = core_for(&sim);

    let mut policy = ReactPolicy::new();
    let outcome = policy.evaluate(&mut sim, &mut core).unwrap();

    assert_eq!(core.autoscale_op, 1);
    assert_eq!(outcome.prev_capacity, 5);
    // missing capacity is 1, plus the two-unit buffer
    assert_eq!(outcome.target, 3);
    // the catalog is exhausted, so nothing could actually start
    assert_eq!(outcome.mutation, 0);
}

#[test]
fn test_react_downscales_only_past_the_buffer() {
    let fx = fixture(&[("c5", 5)], "");
    let mut sim = build_sim(&fx, 100, "fillworstfit", "");
    let mut core = core_for(&sim);

    // idle system: capacity 5, load 0, so excess is 5 > 2
    let mut policy = ReactPolicy::new();
    let outcome = policy.evaluate(&mut sim, &mut core).unwrap();

    assert_eq!(core.autoscale_op, -1);
    assert_eq!(outcome.target, 7);
    assert_eq!(outcome.mutation, 5);
    assert_eq!(sim.get_current_capacity(), 0);
}

#[test]
fn test_hist_reacts_to_load_above_capacity() {
    let rows: String = (0..3).map(|i| gwf_row("", i, 0, 10, 2, "")).collect();
    let fx = fixture(&[("c5", 5)], &rows);
    let mut sim = build_sim(&fx, 100, "fillworstfit", "");
    let mut core = core_for(&sim);

    let mut policy = HistPolicy::new(0.9);
    let outcome = policy.evaluate(&mut sim, &mut core).unwrap();

    // single histogram sample: percentile is the load itself
    assert_eq!(core.autoscale_op, 1);
    assert_eq!(outcome.target, 1);
}

#[test]
fn test_token_lop_of_a_diamond_is_its_width() {
    let rows = [
        gwf_row("0", 0, 0, 5, 1, ""),
        gwf_row("0", 1, 0, 5, 1, ""),
        gwf_row("0", 2, 0, 5, 1, "0 1"),
        gwf_row("0", 3, 0, 5, 1, "2"),
        gwf_row("0", 4, 0, 5, 1, "2"),
    ]
    .concat();
    let fx = fixture(&[("c2", 2)], &rows);
    let sim = build_sim(&fx, 100, "fillworstfit", "");

    // two entry tokens merge into one and fan back out to two
    assert_eq!(token::estimate_lop(&sim, 0, 0), 2);
    assert_eq!(token::estimate_lop(&sim, 0, 3), 2);
}

#[test]
fn test_token_prediction_scales_toward_workflow_width() {
    let rows = [
        gwf_row("0", 0, 0, 5, 1, ""),
        gwf_row("0", 1, 0, 5, 1, ""),
        gwf_row("0", 2, 0, 5, 1, "0 1"),
    ]
    .concat();
    let fx = fixture(&[("c2", 2)], &rows);
    let mut sim = build_sim(&fx, 100, "fillworstfit", "");
    let mut core = core_for(&sim);

    let mut policy = TokenPolicy::new(30, 500);
    let outcome = policy.evaluate(&mut sim, &mut core).unwrap();

    // predicted level of parallelism equals current capacity: no scaling
    assert_eq!(outcome.prediction, 2.0);
    assert_eq!(outcome.mutation, 0);
    assert_eq!(core.autoscale_op, 0);
}

#[test]
fn test_remaining_policies_evaluate_without_scaling_room() {
    // a single busy site: every policy must evaluate cleanly even though
    // nothing can be started or released
    for name in ["plan", "adapt", "token_mod", "conpaas", "reg"] {
        let rows = gwf_row("", 0, 0, 1000, 1, "");
        let fx = fixture(&[("c5", 5)], &rows);
        let mut sim = build_sim(&fx, 70, "fillworstfit", name);
        sim.run().unwrap_or_else(|e| panic!("{} run failed: {}", name, e));

        let ops = std::fs::read_to_string(sim.output.join("autoscaler.log")).unwrap();
        assert_eq!(ops.lines().count(), 2, "two evaluations for {}", name);
    }
}

#[test]
fn test_kpi_logs_are_written_per_evaluation() {
    // one long task keeps the run alive past two evaluation periods
    let rows = gwf_row("", 0, 0, 1000, 1, "");
    let fx = fixture(&[("c5", 5)], &rows);
    let mut sim = build_sim(&fx, 70, "fillworstfit", "react");
    sim.run().unwrap();

    let output = sim.output.clone();
    let read = |name: &str| std::fs::read_to_string(output.join(name)).expect("log file");

    // evaluations at ticks 30 and 60, plus the closing horizon line
    let elasticity = read("elasticity_metrics.log");
    let lines: Vec<&str> = elasticity.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0].split_whitespace().count(), 10);
    assert_eq!(lines[2], format!("70 {}", 5));

    let cost = read("cost_metrics.log");
    assert_eq!(cost.lines().count(), 3);

    let ops = read("autoscaler.log");
    let ops_lines: Vec<&str> = ops.lines().collect();
    assert_eq!(ops_lines.len(), 2);
    assert_eq!(ops_lines[0].split(", ").count(), 4);

    let overview = read("elasticity_overview.log");
    let overview_lines: Vec<&str> = overview.lines().collect();
    assert_eq!(overview_lines.len(), 1);
    assert_eq!(overview_lines[0].split(", ").count(), 12);
}
