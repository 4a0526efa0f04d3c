//! Task data model and lifecycle
//!
//! Tasks are stored in an id-keyed arena; every other structure (sites,
//! central queue, workflows) refers to them by [`TaskId`] only. Use the
//! lifecycle methods (`queue_at_site`, `run`, `interrupt`, `stop`) to move
//! a task through its states instead of mutating the fields directly.

use crate::kernel::{EntityId, TaskId, WorkflowId};
use serde::Serialize;
use shared::SimulatorError;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Submitted,
    Queued,
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub ts_submit: u64,
    /// Cluster index the task was submitted from.
    pub submission_site: usize,
    pub runtime: u64,
    pub cpus: u64,
    /// Parent task ids whose completion this task still waits for.
    /// Drained one by one as parents finish.
    pub dependencies: BTreeSet<TaskId>,
    pub parents: Vec<TaskId>,
    pub children: Vec<TaskId>,
    pub workflow_id: Option<WorkflowId>,

    pub status: TaskStatus,
    pub running_site: Option<EntityId>,
    pub ts_start: Option<u64>,
    pub ts_end: Option<u64>,
}

impl Task {
    /// Creates a submitted task. Non-positive runtimes and cpu counts are
    /// clamped to 1 (input normalization, not an error).
    pub fn new(
        id: TaskId,
        ts_submit: u64,
        submission_site: usize,
        runtime: i64,
        cpus: i64,
        dependencies: BTreeSet<TaskId>,
        workflow_id: Option<WorkflowId>,
    ) -> Self {
        Self {
            id,
            ts_submit,
            submission_site,
            runtime: runtime.max(1) as u64,
            cpus: cpus.max(1) as u64,
            dependencies,
            parents: Vec::new(),
            children: Vec::new(),
            workflow_id,
            status: TaskStatus::Submitted,
            running_site: None,
            ts_start: None,
            ts_end: None,
        }
    }

    /// Called when the task gets added to a site's local queue.
    pub fn queue_at_site(&mut self, site: EntityId) {
        self.status = TaskStatus::Queued;
        self.running_site = Some(site);
    }

    /// Called when the task starts executing.
    pub fn run(&mut self, ts_start: u64, ts_end: u64) {
        debug_assert!(ts_start <= ts_end);
        self.status = TaskStatus::Running;
        self.ts_start = Some(ts_start);
        self.ts_end = Some(ts_end);
    }

    /// Called when the task is stopped before finishing execution.
    /// Reverts every field that queuing or running touched.
    pub fn interrupt(&mut self) {
        self.status = TaskStatus::Submitted;
        self.running_site = None;
        self.ts_start = None;
        self.ts_end = None;
    }

    /// Called when the task is done. Terminal.
    pub fn stop(&mut self) {
        self.status = TaskStatus::Finished;
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Finished
    }
}

/// Id-keyed task storage. A `BTreeMap` keeps iteration deterministic.
#[derive(Debug, Default)]
pub struct TaskArena {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Lookup that treats a missing id as a broken invariant.
    pub fn require(&self, id: TaskId) -> Result<&Task, SimulatorError> {
        self.tasks
            .get(&id)
            .ok_or_else(|| SimulatorError::Invariant(format!("task {} not in arena", id)))
    }

    pub fn require_mut(&mut self, id: TaskId) -> Result<&mut Task, SimulatorError> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| SimulatorError::Invariant(format!("task {} not in arena", id)))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}
