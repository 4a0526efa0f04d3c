//! Token: workflow-structure-aware level-of-parallelism estimation
//!
//! For every incomplete workflow the policy derives a token depth from the
//! critical path (`ceil(time_threshold * path_task_count / path_length)`)
//! and then floods tokens through the DAG for that many rounds: a child is
//! tokenized once all of its parents are tokenized or already visited,
//! otherwise the token stays put. The peak number of concurrently held
//! tokens is the workflow's predicted level of parallelism; the sum across
//! workflows, capped by the configured maximum capacity, is the target.
//!
//! The `token_mod` variant skips the rank computation and reuses the
//! critical-path length and task count already annotated on the workflow
//! at admission; the two variants are otherwise intentionally identical.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::kernel::{TaskId, WorkflowId};
use crate::sim::SystemSim;
use crate::task::TaskStatus;
use shared::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

pub struct TokenPolicy {
    time_threshold: f64,
    max_capacity: u64,
    critical_paths: HashMap<WorkflowId, Vec<u64>>,
}

pub struct TokenModPolicy {
    time_threshold: f64,
}

/// Workflow ids with at least one unfinished exit task, in id order.
fn incomplete_workflows(sim: &mut SystemSim) -> Vec<WorkflowId> {
    let ids: Vec<WorkflowId> = sim.workflows.keys().copied().collect();
    ids.into_iter()
        .filter(|id| match sim.workflows.get_mut(id) {
            Some(workflow) => !workflow.workflow_completed(&sim.tasks),
            None => false,
        })
        .collect()
}

/// Unfinished tasks whose dependencies are met: the places tokens start.
fn entry_tasks(sim: &SystemSim, workflow_id: WorkflowId) -> Vec<TaskId> {
    let Some(workflow) = sim.workflows.get(&workflow_id) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for &task_id in &workflow.tasks {
        let Some(task) = sim.tasks.get(task_id) else {
            continue;
        };
        if task.status == TaskStatus::Finished {
            continue;
        }

        if task.dependencies.is_empty() {
            entries.push(task_id);
        } else {
            let all_parents_done = task.parents.iter().all(|&parent| {
                sim.tasks
                    .get(parent)
                    .is_some_and(|parent| parent.status == TaskStatus::Finished)
            });
            if all_parents_done {
                entries.push(task_id);
            }
        }
    }

    entries
}

fn all_parents_tokenized_or_visited(
    sim: &SystemSim,
    task_id: TaskId,
    visited: &BTreeSet<TaskId>,
    tokenized: &[TaskId],
) -> bool {
    let Some(task) = sim.tasks.get(task_id) else {
        return false;
    };
    task.parents
        .iter()
        .all(|parent| visited.contains(parent) || tokenized.contains(parent))
}

/// Token propagation for `depth` rounds; returns the peak token count.
pub(crate) fn estimate_lop(sim: &SystemSim, workflow_id: WorkflowId, depth: u64) -> u64 {
    let mut visited: BTreeSet<TaskId> = BTreeSet::new();
    let mut tokenized = entry_tasks(sim, workflow_id);
    let mut lop = tokenized.len();

    for _ in 0..depth {
        let mut new_tokenized: Vec<TaskId> = Vec::new();

        for &task_id in &tokenized {
            let Some(task) = sim.tasks.get(task_id) else {
                continue;
            };
            for &child in &task.children {
                if all_parents_tokenized_or_visited(sim, child, &visited, &tokenized) {
                    // place the token on the child, retire the parent
                    if !new_tokenized.contains(&child) {
                        new_tokenized.push(child);
                    }
                    visited.insert(task_id);
                } else if !new_tokenized.contains(&task_id) {
                    // token stays where it is
                    new_tokenized.push(task_id);
                }
            }
        }

        tokenized = new_tokenized;
        if tokenized.is_empty() {
            break;
        }
        lop = lop.max(tokenized.len());
    }

    lop as u64
}

/// Applies a signed capacity delta and fills in the shared outcome shape.
fn apply_prediction(
    sim: &mut SystemSim,
    core: &mut AutoscalerCore,
    prediction: u64,
) -> Result<ScaleOutcome> {
    let current_capacity = sim.get_current_capacity();
    let delta = prediction as i64 - current_capacity as i64;

    let mut outcome = ScaleOutcome {
        prediction: prediction as f64,
        prev_capacity: current_capacity,
        target: delta.unsigned_abs(),
        ..ScaleOutcome::default()
    };

    if delta < 0 {
        core.autoscale_op = -1;
        outcome.mutation = sim.release_resources_best_effort(outcome.target, true, false)?;
    } else if delta > 0 {
        core.autoscale_op = 1;
        outcome.mutation = sim.start_up_best_effort(outcome.target, false)?;
    }

    debug!(prediction, mutation = outcome.mutation, "token scaling applied");
    Ok(outcome)
}

impl TokenPolicy {
    pub fn new(time_threshold: u64, max_capacity: u64) -> Self {
        Self {
            time_threshold: time_threshold as f64,
            max_capacity,
            critical_paths: HashMap::new(),
        }
    }

    /// Upward ranks via an explicit reverse-topological sweep: children
    /// are ranked before their parents, no recursion involved.
    fn upward_ranks(sim: &SystemSim, workflow_id: WorkflowId) -> BTreeMap<TaskId, u64> {
        let Some(workflow) = sim.workflows.get(&workflow_id) else {
            return BTreeMap::new();
        };

        let mut pending_children: BTreeMap<TaskId, usize> = BTreeMap::new();
        let mut frontier: Vec<TaskId> = Vec::new();
        for &task_id in &workflow.tasks {
            let Some(task) = sim.tasks.get(task_id) else {
                continue;
            };
            let children = task.children.len();
            pending_children.insert(task_id, children);
            if children == 0 {
                frontier.push(task_id);
            }
        }

        let mut ranks: BTreeMap<TaskId, u64> = BTreeMap::new();
        while let Some(task_id) = frontier.pop() {
            let Some(task) = sim.tasks.get(task_id) else {
                continue;
            };
            let max_child_rank = task
                .children
                .iter()
                .map(|child| ranks.get(child).copied().unwrap_or(0))
                .max()
                .unwrap_or(0);
            ranks.insert(task_id, task.runtime + max_child_rank);

            for &parent in &task.parents {
                if let Some(pending) = pending_children.get_mut(&parent) {
                    *pending -= 1;
                    if *pending == 0 {
                        frontier.push(parent);
                    }
                }
            }
        }

        ranks
    }

    /// Runtimes along the maximum-upward-rank chain, entry to exit.
    fn critical_path(sim: &SystemSim, workflow_id: WorkflowId, ranks: &BTreeMap<TaskId, u64>) -> Vec<u64> {
        let mut path = Vec::new();
        let mut frontier = entry_tasks(sim, workflow_id);

        while !frontier.is_empty() {
            let mut best: Option<TaskId> = None;
            for &candidate in &frontier {
                let better = match best {
                    None => true,
                    Some(current) => {
                        ranks.get(&candidate).copied().unwrap_or(0)
                            > ranks.get(&current).copied().unwrap_or(0)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }

            let Some(best) = best else { break };
            let Some(task) = sim.tasks.get(best) else { break };
            path.push(task.runtime);
            frontier = task.children.clone();
        }

        path
    }

    /// Refreshes the per-workflow critical-path cache, keeping entries of
    /// workflows that are still incomplete and computing the rest.
    fn calculate_critical_paths(&mut self, sim: &mut SystemSim) {
        let workflows = incomplete_workflows(sim);

        let mut new_paths: HashMap<WorkflowId, Vec<u64>> = HashMap::new();
        for workflow_id in workflows {
            match self.critical_paths.remove(&workflow_id) {
                Some(path) => {
                    new_paths.insert(workflow_id, path);
                }
                None => {
                    let ranks = Self::upward_ranks(sim, workflow_id);
                    new_paths.insert(workflow_id, Self::critical_path(sim, workflow_id, &ranks));
                }
            }
        }

        self.critical_paths = new_paths;
    }
}

impl ScalingPolicy for TokenPolicy {
    fn name(&self) -> &'static str {
        "Token"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        self.calculate_critical_paths(sim);

        let mut prediction: u64 = 0;
        for workflow_id in incomplete_workflows(sim) {
            let Some(path) = self.critical_paths.get(&workflow_id) else {
                continue;
            };
            let duration: u64 = path.iter().sum();
            if duration == 0 {
                continue;
            }

            let depth =
                ((self.time_threshold * path.len() as f64) / duration as f64).ceil() as u64;
            prediction += estimate_lop(sim, workflow_id, depth);
            if prediction >= self.max_capacity {
                break;
            }
        }

        apply_prediction(sim, core, prediction)
    }
}

impl TokenModPolicy {
    pub fn new(time_threshold: u64) -> Self {
        Self {
            time_threshold: time_threshold as f64,
        }
    }
}

impl ScalingPolicy for TokenModPolicy {
    fn name(&self) -> &'static str {
        "Token"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let mut prediction: u64 = 0;
        for workflow_id in incomplete_workflows(sim) {
            let Some((length, count)) = sim
                .workflows
                .get(&workflow_id)
                .map(|workflow| (workflow.critical_path_length, workflow.critical_path_task_count))
            else {
                continue;
            };
            if length == 0 {
                continue;
            }

            let depth = ((self.time_threshold * count as f64) / length as f64).ceil() as u64;
            prediction += estimate_lop(sim, workflow_id, depth);
        }

        apply_prediction(sim, core, prediction)
    }
}
