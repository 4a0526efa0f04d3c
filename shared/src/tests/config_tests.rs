//! Tests for configuration loading, defaults and validation

use crate::config::SimConfig;
use std::io::Write;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn test_minimal_config_gets_defaults() {
    let file = write_config(
        r#"
[simulation]
N_TICKS = 86400
"#,
    );

    let config = SimConfig::load(file.path()).expect("load");

    assert_eq!(config.simulation.n_ticks, 86400);
    assert_eq!(config.simulation.scheduler, "fillworstfit");
    assert_eq!(config.simulation.autoscaler, "");
    assert_eq!(config.simulation.cluster_setup, "clustersetup.csv");
    assert_eq!(config.simulation.db_log, "log.db3");
    assert!(config.simulation.db_logging_enabled);
    assert_eq!(config.central_queue.n_ticks_monitor_site_status, 5);
    assert_eq!(config.autoscaler.n_ticks_per_evaluate, 30);
    assert_eq!(config.autoscaler.hist_percentile, 0.9);
    assert_eq!(config.autoscaler.token_max_capacity, 500);
    assert_eq!(config.site_monitor.n_ticks_between_monitoring, 1);
    assert_eq!(config.system_monitor.n_ticks_update_statistics, 1);
}

#[test]
fn test_full_config_round_trip() {
    let file = write_config(
        r#"
[experiment]
ID = "exp1"
ITERATION = "3"

[simulation]
N_TICKS = 600
Scheduler = "bestfit"
Autoscaler = "react"
ClusterSetup = "clusters.csv"
GWF = "trace.gwf"

[autoscaler]
N_TICKS_PER_EVALUATE = 2
SERVER_SPEED = 2.0

[central_queue]
N_TICKS_MONITOR_SITE_STATUS = 1
"#,
    );

    let config = SimConfig::load(file.path()).expect("load");

    assert_eq!(config.experiment.id, "exp1");
    assert_eq!(config.experiment.iteration, "3");
    assert_eq!(config.simulation.scheduler, "bestfit");
    assert_eq!(config.simulation.autoscaler, "react");
    assert_eq!(config.simulation.gwf.as_deref(), Some("trace.gwf"));
    assert_eq!(config.autoscaler.n_ticks_per_evaluate, 2);
    assert_eq!(config.autoscaler.server_speed, 2.0);
    assert_eq!(config.central_queue.n_ticks_monitor_site_status, 1);
}

#[test]
fn test_missing_n_ticks_is_rejected() {
    let file = write_config(
        r#"
[simulation]
Scheduler = "bestfit"
"#,
    );

    assert!(SimConfig::load(file.path()).is_err());
}

#[test]
fn test_unknown_scheduler_is_rejected() {
    let file = write_config(
        r#"
[simulation]
N_TICKS = 10
Scheduler = "roundrobin"
"#,
    );

    assert!(SimConfig::load(file.path()).is_err());
}

#[test]
fn test_unknown_autoscaler_is_rejected() {
    let file = write_config(
        r#"
[simulation]
N_TICKS = 10
Autoscaler = "magic"
"#,
    );

    assert!(SimConfig::load(file.path()).is_err());
}

#[test]
fn test_empty_autoscaler_disables_autoscaling() {
    let config = SimConfig::generate(100, None, None).expect("generate");
    assert_eq!(config.simulation.autoscaler, "");
}

#[test]
fn test_generated_config_validates() {
    let config = SimConfig::generate(86400, Some("test.gwf".into()), Some(5)).expect("generate");
    assert_eq!(config.simulation.n_ticks, 86400);
    assert_eq!(config.simulation.gwf.as_deref(), Some("test.gwf"));
    assert_eq!(config.simulation.n_clusters, Some(5));

    assert!(SimConfig::generate(0, None, None).is_err());
}

#[test]
fn test_output_dir_nesting_and_save() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut config = SimConfig::generate(10, None, None).expect("generate");
    config.simulation.output_dir = dir.path().join("out").to_string_lossy().into_owned();
    config.experiment.id = "expA".into();
    config.experiment.iteration = "1".into();

    let output = config.output_dir().expect("output dir");
    assert!(output.ends_with("out/expA/1"));
    assert!(output.is_dir());

    config.save(&output).expect("save");
    let reloaded = SimConfig::load(&output.join("config.toml")).expect("reload");
    assert_eq!(reloaded, config);
}
