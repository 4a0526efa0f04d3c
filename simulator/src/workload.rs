//! Workload assembly: GWF rows into the task arena and workflow map
//!
//! Workload files are independent: task and workflow ids restart in each
//! one, so the loader applies a monotonic id offset per file (and per
//! workflow within a file) before tasks enter the arena. Dependencies are
//! wired into parent/child adjacency within each file; a dependency on a
//! task the file does not contain, a cyclic graph, or a negative time
//! aborts the load.

use crate::kernel::{TaskId, WorkflowId};
use crate::task::{Task, TaskArena};
use crate::workflow::{critical_path_with_count, Workflow};
use shared::gwf::read_gwf_rows;
use shared::{Result, SimulatorError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// Reads every workload file, offsets ids, wires the DAGs and annotates
/// workflows with their critical paths. Files are assigned to clusters
/// round-robin as their submission site. Returns the workflow map and the
/// admitted task ids in file order.
pub fn read_tasks(
    arena: &mut TaskArena,
    cluster_count: usize,
    gwf_paths: &[PathBuf],
) -> Result<(BTreeMap<WorkflowId, Workflow>, Vec<TaskId>)> {
    let mut workflows: BTreeMap<WorkflowId, Workflow> = BTreeMap::new();
    let mut all_task_ids: Vec<TaskId> = Vec::new();

    let mut first_task_id: u64 = 0;
    let mut highest_task_id: u64 = 0;
    let mut current_workflow_id: Option<WorkflowId> = None;
    let mut prev_workflow_task_count: u64 = 0;

    for (file_index, path) in gwf_paths.iter().enumerate() {
        let cluster_id = file_index % cluster_count;
        debug!(cluster = cluster_id, file = %path.display(), "loading workload");

        // ids restart per file; a fresh base offset keeps files disjoint
        if file_index > 0 {
            first_task_id = first_task_id.max(highest_task_id + 1);
            prev_workflow_task_count = 0;
        }

        let mut prev_gwf_workflow_id: Option<u64> = None;
        let mut file_task_ids: Vec<TaskId> = Vec::new();
        let mut ids_in_file: BTreeSet<TaskId> = BTreeSet::new();

        for row in read_gwf_rows(path)? {
            let workflow_id = match row.workflow_id {
                Some(file_workflow_id) => {
                    if prev_gwf_workflow_id != Some(file_workflow_id) {
                        // a new workflow begins; advance the id offset past
                        // the previous one's tasks
                        prev_gwf_workflow_id = Some(file_workflow_id);
                        current_workflow_id = Some(match current_workflow_id {
                            None => 0,
                            Some(workflow_id) => {
                                first_task_id += prev_workflow_task_count;
                                prev_workflow_task_count = 0;
                                workflow_id + 1
                            }
                        });
                    }
                    prev_workflow_task_count += 1;
                    current_workflow_id
                }
                None => None,
            };

            let task_id = row.task_id + first_task_id;
            highest_task_id = highest_task_id.max(task_id);
            let dependencies: BTreeSet<TaskId> =
                row.dependencies.iter().map(|dep| dep + first_task_id).collect();

            if arena.contains(task_id) {
                return Err(SimulatorError::Workload(format!(
                    "duplicate task id {} in {}",
                    task_id,
                    path.display()
                ))
                .into());
            }

            let task = Task::new(
                task_id,
                row.ts_submit,
                cluster_id,
                row.runtime,
                row.cpus,
                dependencies,
                workflow_id,
            );
            arena.insert(task);
            ids_in_file.insert(task_id);
            file_task_ids.push(task_id);
        }

        // wire the parent/child adjacency within this file
        for &task_id in &file_task_ids {
            let dependencies = arena.require(task_id)?.dependencies.clone();
            for dependency in dependencies {
                if !ids_in_file.contains(&dependency) {
                    return Err(SimulatorError::Workload(format!(
                        "task {} in {} depends on unknown task {}",
                        task_id,
                        path.display(),
                        dependency
                    ))
                    .into());
                }
                arena.require_mut(dependency)?.children.push(task_id);
                arena.require_mut(task_id)?.parents.push(dependency);
            }
        }

        for &task_id in &file_task_ids {
            if let Some(workflow_id) = arena.get(task_id).and_then(|task| task.workflow_id) {
                workflows
                    .entry(workflow_id)
                    .or_insert_with(|| Workflow::new(workflow_id, 0, Vec::new()))
                    .tasks
                    .push(task_id);
            }
        }

        info!(
            tasks = file_task_ids.len(),
            cluster = cluster_id,
            "read workload file"
        );
        all_task_ids.extend(file_task_ids);
    }

    // workflows can have multiple entry tasks; the earliest submit wins
    for workflow in workflows.values_mut() {
        workflow.ts_submit = workflow
            .tasks
            .iter()
            .filter_map(|&id| arena.get(id))
            .map(|task| task.ts_submit)
            .min()
            .unwrap_or(0);
        let (length, count) = critical_path_with_count(workflow.id, &workflow.tasks, arena)?;
        workflow.critical_path_length = length;
        workflow.critical_path_task_count = count;
    }

    info!(workflows = workflows.len(), "workload assembled");
    Ok((workflows, all_task_ids))
}
