//! Readers for the workload (GWF) and cluster descriptor files
//!
//! Both inputs are CSV with headers. GWF files follow the Grid Workloads
//! Format spirit: one task per row, dependencies as space-separated task
//! ids, a blank `WorkflowID` meaning the task belongs to no workflow.
//! Fields are routinely padded with whitespace in traces, so everything
//! is parsed with trimming.

use crate::{Result, SimulatorError};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const GWF_EXTENSION: &str = "gwf";

/// One parsed GWF row. Ids are file-local; the workload loader applies
/// per-file offsets before the tasks enter the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct GwfRow {
    pub workflow_id: Option<u64>,
    pub task_id: u64,
    pub ts_submit: u64,
    pub runtime: i64,
    pub cpus: i64,
    pub dependencies: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RawGwfRow {
    #[serde(rename = "WorkflowID")]
    workflow_id: String,
    #[serde(rename = "JobID")]
    job_id: u64,
    #[serde(rename = "SubmitTime")]
    submit_time: i64,
    #[serde(rename = "RunTime")]
    run_time: i64,
    #[serde(rename = "NProcs")]
    n_procs: i64,
    #[serde(rename = "ReqNProcs")]
    #[allow(dead_code)]
    req_n_procs: String,
    #[serde(rename = "Dependencies", default)]
    dependencies: String,
}

/// Reads all task rows of a single GWF file.
pub fn read_gwf_rows(path: &Path) -> Result<Vec<GwfRow>> {
    let file = File::open(path).map_err(|e| {
        SimulatorError::Workload(format!("cannot open workload file {}: {}", path.display(), e))
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    for record in reader.deserialize::<RawGwfRow>() {
        let raw = record.map_err(|e| {
            SimulatorError::Workload(format!("malformed row in {}: {}", path.display(), e))
        })?;

        if raw.submit_time < 0 {
            return Err(SimulatorError::Workload(format!(
                "task {} in {} has negative submit time {}",
                raw.job_id,
                path.display(),
                raw.submit_time
            ))
            .into());
        }

        let workflow_id = if raw.workflow_id.is_empty() {
            None
        } else {
            Some(raw.workflow_id.parse::<u64>().map_err(|e| {
                SimulatorError::Workload(format!(
                    "invalid workflow id '{}' in {}: {}",
                    raw.workflow_id,
                    path.display(),
                    e
                ))
            })?)
        };

        let mut dependencies = Vec::new();
        for dep in raw.dependencies.split_whitespace() {
            dependencies.push(dep.parse::<u64>().map_err(|e| {
                SimulatorError::Workload(format!(
                    "invalid dependency '{}' for task {} in {}: {}",
                    dep,
                    raw.job_id,
                    path.display(),
                    e
                ))
            })?);
        }

        rows.push(GwfRow {
            workflow_id,
            task_id: raw.job_id,
            ts_submit: raw.submit_time as u64,
            runtime: raw.run_time,
            cpus: raw.n_procs,
            dependencies,
        });
    }

    debug!(rows = rows.len(), file = %path.display(), "parsed workload file");
    Ok(rows)
}

/// One row of the cluster descriptor file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub cluster: String,
    pub n_procs: u64,
    pub resource_speed: f64,
}

#[derive(Debug, Deserialize)]
struct RawClusterRow {
    #[serde(rename = "ClusterID")]
    cluster_id: String,
    #[serde(rename = "Cluster")]
    cluster: String,
    #[serde(rename = "Resource")]
    resource: u64,
    #[serde(rename = "Speed")]
    speed: f64,
    #[serde(rename = "Gwf", default)]
    gwf: String,
}

/// Reads the cluster descriptor file. Returns the cluster list and the
/// workload filenames referenced by the optional `Gwf` column, in file
/// order.
pub fn read_cluster_setup(path: &Path) -> Result<(Vec<ClusterInfo>, Vec<String>)> {
    let file = File::open(path).map_err(|e| {
        SimulatorError::Config(format!(
            "cannot open cluster setup {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let mut clusters = Vec::new();
    let mut gwf_filenames = Vec::new();
    for record in reader.deserialize::<RawClusterRow>() {
        let raw = record.map_err(|e| {
            SimulatorError::Config(format!("malformed row in {}: {}", path.display(), e))
        })?;

        clusters.push(ClusterInfo {
            cluster_id: raw.cluster_id,
            cluster: raw.cluster,
            n_procs: raw.resource,
            resource_speed: raw.speed,
        });

        if !raw.gwf.is_empty() {
            gwf_filenames.push(raw.gwf);
        }
    }

    Ok((clusters, gwf_filenames))
}

/// Expands a workload argument into concrete .gwf files: a file stands for
/// itself, a directory for all .gwf files directly inside it. The listing
/// is sorted so that multi-file workloads get stable id offsets.
pub fn gwf_files(file_or_folder: &Path) -> Result<Vec<PathBuf>> {
    if file_or_folder.is_file() {
        return Ok(vec![file_or_folder.to_path_buf()]);
    }

    if !file_or_folder.is_dir() {
        return Err(SimulatorError::Workload(format!(
            "workload path {} is neither a file nor a directory",
            file_or_folder.display()
        ))
        .into());
    }

    let mut files = Vec::new();
    let entries = std::fs::read_dir(file_or_folder).map_err(|e| {
        SimulatorError::Workload(format!(
            "cannot list workload directory {}: {}",
            file_or_folder.display(),
            e
        ))
    })?;

    for entry in entries {
        let path = entry
            .map_err(|e| SimulatorError::Workload(format!("cannot read directory entry: {}", e)))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == GWF_EXTENSION) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
