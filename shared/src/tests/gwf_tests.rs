//! Tests for the GWF and cluster descriptor readers

use crate::gwf::{gwf_files, read_cluster_setup, read_gwf_rows};
use std::io::Write;
use std::path::Path;

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).expect("create file");
    file.write_all(content.as_bytes()).expect("write file");
    path
}

#[test]
fn test_gwf_rows_with_padding_and_dependencies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        dir.path(),
        "trace.gwf",
        "WorkflowID, JobID, SubmitTime, RunTime, NProcs, ReqNProcs, Dependencies\n\
         0, 0, 0, 5, 1, 1, \n\
         0, 1, 0, 5, 1, 1, \n\
         0, 2, 3, 5, 2, 2, 0 1\n",
    );

    let rows = read_gwf_rows(&path).expect("parse");
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].workflow_id, Some(0));
    assert_eq!(rows[0].task_id, 0);
    assert!(rows[0].dependencies.is_empty());

    assert_eq!(rows[2].ts_submit, 3);
    assert_eq!(rows[2].cpus, 2);
    assert_eq!(rows[2].dependencies, vec![0, 1]);
}

#[test]
fn test_blank_workflow_id_means_no_workflow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        dir.path(),
        "trace.gwf",
        "WorkflowID, JobID, SubmitTime, RunTime, NProcs, ReqNProcs, Dependencies\n\
         , 7, 10, 100, 4, 4, \n",
    );

    let rows = read_gwf_rows(&path).expect("parse");
    assert_eq!(rows[0].workflow_id, None);
    assert_eq!(rows[0].task_id, 7);
}

#[test]
fn test_negative_submit_time_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        dir.path(),
        "trace.gwf",
        "WorkflowID, JobID, SubmitTime, RunTime, NProcs, ReqNProcs, Dependencies\n\
         0, 0, -5, 5, 1, 1, \n",
    );

    assert!(read_gwf_rows(&path).is_err());
}

#[test]
fn test_negative_runtime_parses_and_is_left_for_clamping() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        dir.path(),
        "trace.gwf",
        "WorkflowID, JobID, SubmitTime, RunTime, NProcs, ReqNProcs, Dependencies\n\
         0, 0, 0, -1, -2, 1, \n",
    );

    let rows = read_gwf_rows(&path).expect("parse");
    assert_eq!(rows[0].runtime, -1);
    assert_eq!(rows[0].cpus, -2);
}

#[test]
fn test_cluster_setup_with_and_without_gwf_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        dir.path(),
        "clusters.csv",
        "ClusterID, Cluster, Resource, Speed, Gwf\n\
         c1, siteA, 5, 1, trace.gwf\n\
         c2, siteB, 16, 2.5, \n",
    );

    let (clusters, gwfs) = read_cluster_setup(&path).expect("parse");
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].cluster_id, "c1");
    assert_eq!(clusters[0].n_procs, 5);
    assert_eq!(clusters[1].resource_speed, 2.5);
    assert_eq!(gwfs, vec!["trace.gwf".to_string()]);
}

#[test]
fn test_gwf_files_expands_directories_sorted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let header = "WorkflowID, JobID, SubmitTime, RunTime, NProcs, ReqNProcs, Dependencies\n";
    let b = write_file(dir.path(), "b.gwf", header);
    let a = write_file(dir.path(), "a.gwf", header);
    write_file(dir.path(), "notes.txt", "ignored");

    let files = gwf_files(dir.path()).expect("expand");
    assert_eq!(files, vec![a.clone(), b]);

    let single = gwf_files(&a).expect("single file");
    assert_eq!(single, vec![a]);

    assert!(gwf_files(&dir.path().join("missing")).is_err());
}
