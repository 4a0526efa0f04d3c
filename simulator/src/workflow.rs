//! Workflow data model and critical-path analysis
//!
//! A workflow is a DAG of tasks. The critical path is the longest chain of
//! runtimes from any entry task to any exit task, where a gap between a
//! parent's finish and a child's submit time also lengthens the path; its
//! length bounds the minimum makespan on unlimited resources.

use crate::kernel::{TaskId, WorkflowId};
use crate::task::TaskArena;
use shared::{Result, SimulatorError};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Submitted,
    Started,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Minimum `ts_submit` across the workflow's tasks.
    pub ts_submit: u64,
    pub tasks: Vec<TaskId>,

    pub critical_path_length: u64,
    pub critical_path_task_count: u64,
    pub ts_start: Option<u64>,
    pub ts_finish: Option<u64>,
    pub status: WorkflowStatus,
}

impl Workflow {
    pub fn new(id: WorkflowId, ts_submit: u64, tasks: Vec<TaskId>) -> Self {
        Self {
            id,
            ts_submit,
            tasks,
            critical_path_length: 0,
            critical_path_task_count: 0,
            ts_start: None,
            ts_finish: None,
            status: WorkflowStatus::Submitted,
        }
    }

    pub fn workflow_started(&self) -> bool {
        self.status != WorkflowStatus::Submitted
    }

    /// Marks the workflow as started. Starting twice is a programming
    /// error: STARTED is monotonic once set.
    pub fn start(&mut self, ts_now: u64) -> Result<()> {
        if self.status != WorkflowStatus::Submitted {
            return Err(SimulatorError::Invariant(format!(
                "workflow {} started twice",
                self.id
            ))
            .into());
        }

        self.ts_start = Some(ts_now);
        self.status = WorkflowStatus::Started;
        Ok(())
    }

    /// A workflow is complete when all its exit tasks (tasks without
    /// children) are finished. Caches the FINISHED status once reached.
    pub fn workflow_completed(&mut self, tasks: &TaskArena) -> bool {
        if self.status == WorkflowStatus::Finished {
            return true;
        }

        for &task_id in &self.tasks {
            let Some(task) = tasks.get(task_id) else {
                continue;
            };
            if task.children.is_empty() && !task.is_finished() {
                return false;
            }
        }

        self.status = WorkflowStatus::Finished;
        true
    }
}

/// Computes the critical-path length of a workflow together with the number
/// of tasks on that path.
///
/// Finish times propagate through a Kahn topological traversal:
/// `finish(t) = max(max over parents finish, ts_submit(t)) + runtime(t)`.
/// The returned length is the latest finish minus the earliest submit.
/// Ties always resolve toward the smallest task id — among parents with
/// equal finish times and among exit tasks with equal latest finish —
/// which keeps the task count deterministic.
///
/// Fails on cyclic dependency graphs, which also makes this the workload
/// cycle detector.
pub fn critical_path_with_count(
    workflow_id: WorkflowId,
    task_ids: &[TaskId],
    tasks: &TaskArena,
) -> Result<(u64, u64)> {
    if task_ids.is_empty() {
        return Ok((0, 0));
    }

    let mut remaining_deps: BTreeMap<TaskId, usize> = BTreeMap::new();
    let mut ready: VecDeque<TaskId> = VecDeque::new();
    for &id in task_ids {
        let count = tasks.require(id)?.parents.len();
        remaining_deps.insert(id, count);
        if count == 0 {
            ready.push_back(id);
        }
    }

    // (finish time, tasks on the path ending here)
    let mut finish_times: BTreeMap<TaskId, (u64, u64)> = BTreeMap::new();
    let mut visited = 0usize;

    while let Some(id) = ready.pop_front() {
        visited += 1;
        let task = tasks.require(id)?;

        let mut critical_parent: Option<(u64, u64)> = None;
        for &parent in &task.parents {
            let (parent_finish, parent_count) =
                finish_times.get(&parent).copied().ok_or_else(|| {
                    SimulatorError::Invariant(format!(
                        "workflow {}: parent {} visited after child {}",
                        workflow_id, parent, id
                    ))
                })?;
            let better = match critical_parent {
                None => true,
                // Parents are wired in ascending id order (the dependency
                // list is a sorted set), so strict > keeps the smallest id
                // on equal finish times.
                Some((best_finish, _)) => parent_finish > best_finish,
            };
            if better {
                critical_parent = Some((parent_finish, parent_count));
            }
        }

        let (parent_finish, parent_count) = critical_parent.unwrap_or((0, 0));
        let finish = parent_finish.max(task.ts_submit) + task.runtime;
        finish_times.insert(id, (finish, parent_count + 1));

        for &child in &task.children {
            let deps = remaining_deps
                .get_mut(&child)
                .ok_or_else(|| {
                    SimulatorError::Workload(format!(
                        "workflow {}: task {} depends on task {} outside the workflow",
                        workflow_id, child, id
                    ))
                })?;
            *deps -= 1;
            if *deps == 0 {
                ready.push_back(child);
            }
        }
    }

    if visited != task_ids.len() {
        return Err(SimulatorError::Workload(format!(
            "workflow {} contains a dependency cycle",
            workflow_id
        ))
        .into());
    }

    let earliest_submit = task_ids
        .iter()
        .filter_map(|&id| tasks.get(id))
        .map(|task| task.ts_submit)
        .min()
        .unwrap_or(0);
    // max_by_key keeps the last of equal maxima; walking ids in descending
    // order makes the smallest id win ties, like the per-parent step above.
    let (latest_finish, path_count) = finish_times
        .values()
        .rev()
        .max_by_key(|&&(finish, _)| finish)
        .copied()
        .unwrap_or((0, 0));

    Ok((latest_finish - earliest_submit, path_count))
}

/// Critical-path length alone, for callers that don't need the task count.
pub fn critical_path_length(
    workflow_id: WorkflowId,
    task_ids: &[TaskId],
    tasks: &TaskArena,
) -> Result<u64> {
    critical_path_with_count(workflow_id, task_ids, tasks).map(|(length, _)| length)
}
