//! Tests for workload assembly across multiple files

use super::test_utils::{config_for, fixture, gwf_row, GWF_HEADER};
use crate::sim::SystemSim;
use std::io::Write;

fn write_gwf(dir: &std::path::Path, name: &str, rows: &str) {
    let mut file = std::fs::File::create(dir.join(name)).expect("create gwf");
    write!(file, "{}{}", GWF_HEADER, rows).expect("write gwf");
}

#[test]
fn test_ids_stay_disjoint_across_files() {
    let fx = fixture(&[("c", 4)], "");
    let workloads = fx.dir.path().join("wl");
    std::fs::create_dir(&workloads).expect("workload dir");

    write_gwf(
        &workloads,
        "a.gwf",
        &[gwf_row("", 0, 0, 5, 1, ""), gwf_row("", 1, 0, 5, 1, "")].concat(),
    );
    write_gwf(
        &workloads,
        "b.gwf",
        &[gwf_row("", 0, 0, 5, 1, ""), gwf_row("", 1, 0, 5, 1, "0")].concat(),
    );

    let mut config = config_for(&fx, 10, "fillworstfit", "");
    config.simulation.gwf = Some(workloads.to_string_lossy().into_owned());

    let sim = SystemSim::new(config).expect("setup");
    assert_eq!(sim.tasks.len(), 4);

    // b.gwf starts past a.gwf's highest id, dependencies included
    let ids: Vec<u64> = sim.tasks.iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert!(sim.tasks.get(3).unwrap().dependencies.contains(&2));
}

#[test]
fn test_workflow_ids_are_remapped_across_files() {
    let fx = fixture(&[("c", 4)], "");
    let workloads = fx.dir.path().join("wl");
    std::fs::create_dir(&workloads).expect("workload dir");

    write_gwf(
        &workloads,
        "a.gwf",
        &[gwf_row("7", 0, 0, 5, 1, ""), gwf_row("7", 1, 0, 5, 1, "0")].concat(),
    );
    write_gwf(
        &workloads,
        "b.gwf",
        &[gwf_row("7", 0, 0, 5, 1, ""), gwf_row("7", 1, 0, 5, 1, "0")].concat(),
    );

    let mut config = config_for(&fx, 10, "fillworstfit", "");
    config.simulation.gwf = Some(workloads.to_string_lossy().into_owned());

    let sim = SystemSim::new(config).expect("setup");
    assert_eq!(sim.workflows.len(), 2);
    assert!(sim.workflows.contains_key(&0));
    assert!(sim.workflows.contains_key(&1));
    assert_eq!(sim.workflows[&1].critical_path_length, 10);
}

#[test]
fn test_unresolved_dependency_aborts_the_load() {
    let rows = gwf_row("0", 0, 0, 5, 1, "99");
    let fx = fixture(&[("c", 4)], &rows);
    let config = config_for(&fx, 10, "fillworstfit", "");

    assert!(SystemSim::new(config).is_err());
}

#[test]
fn test_cyclic_workflow_aborts_the_load() {
    let rows = [gwf_row("0", 0, 0, 5, 1, "1"), gwf_row("0", 1, 0, 5, 1, "0")].concat();
    let fx = fixture(&[("c", 4)], &rows);
    let config = config_for(&fx, 10, "fillworstfit", "");

    assert!(SystemSim::new(config).is_err());
}
