//! Shared fixtures: cluster descriptors, workload files and simulator
//! instances backed by a temporary directory.

use crate::sim::SystemSim;
use shared::config::SimConfig;
use std::io::Write;
use std::path::PathBuf;

pub const CLUSTER_HEADER: &str = "ClusterID, Cluster, Resource, Speed, Gwf\n";
pub const GWF_HEADER: &str =
    "WorkflowID, JobID, SubmitTime, RunTime, NProcs, ReqNProcs, Dependencies\n";

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub cluster_setup: PathBuf,
}

/// Writes a cluster descriptor and a workload file into a fresh temp
/// directory. `cluster_rows` are `(cluster_id, resources)` pairs; the
/// first row references the workload file.
pub fn fixture(cluster_rows: &[(&str, u64)], gwf_rows: &str) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");

    let workload = dir.path().join("test_workload.gwf");
    let mut file = std::fs::File::create(&workload).expect("create workload");
    write!(file, "{}{}", GWF_HEADER, gwf_rows).expect("write workload");

    let cluster_setup = dir.path().join("test_setup.csv");
    let mut file = std::fs::File::create(&cluster_setup).expect("create cluster setup");
    write!(file, "{}", CLUSTER_HEADER).expect("write header");
    for (index, (cluster_id, resources)) in cluster_rows.iter().enumerate() {
        let gwf = if index == 0 { "test_workload.gwf" } else { "" };
        writeln!(file, "{}, {}, {}, 1, {}", cluster_id, cluster_id, resources, gwf)
            .expect("write cluster row");
    }

    Fixture { dir, cluster_setup }
}

/// One GWF row; dependencies are space-separated parent ids.
pub fn gwf_row(workflow: &str, job: u64, submit: u64, runtime: i64, cpus: i64, deps: &str) -> String {
    format!(
        "{}, {}, {}, {}, {}, {}, {}\n",
        workflow, job, submit, runtime, cpus, cpus, deps
    )
}

pub fn config_for(
    fixture: &Fixture,
    n_ticks: u64,
    scheduler: &str,
    autoscaler: &str,
) -> SimConfig {
    let mut config = SimConfig::generate(n_ticks, None, None).expect("generate config");
    config.simulation.scheduler = scheduler.to_string();
    config.simulation.autoscaler = autoscaler.to_string();
    config.simulation.cluster_setup = fixture.cluster_setup.to_string_lossy().into_owned();
    config.simulation.output_dir = fixture
        .dir
        .path()
        .join("output")
        .to_string_lossy()
        .into_owned();
    // one output directory per policy combination
    config.experiment.id = format!("{}_{}", scheduler, autoscaler);
    config
}

pub fn build_sim(fixture: &Fixture, n_ticks: u64, scheduler: &str, autoscaler: &str) -> SystemSim {
    SystemSim::new(config_for(fixture, n_ticks, scheduler, autoscaler)).expect("simulator setup")
}
