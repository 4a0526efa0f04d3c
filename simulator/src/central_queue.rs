//! Central queue: task admission, readiness tracking and the site index
//!
//! The queue keeps every non-placed task in exactly one of three disjoint
//! collections, all ordered by submit tick:
//!
//! - `pending_dependencies`: tasks still waiting for parents to finish;
//! - `submitted_future`: dependency-free tasks whose submit tick has not
//!   been reached yet;
//! - `ready`: tasks eligible for placement right now.
//!
//! It also owns the site-stat index the allocation policies work on: one
//! record per running site, reachable both in insertion order and sorted
//! ascending by free resources. Every mutation keeps both orderings, the
//! id map and the running total consistent before control returns to the
//! event loop.

use crate::kernel::{EntityId, Event, EventKind, TaskId};
use crate::site::{Site, SiteStatus};
use crate::sim::SystemSim;
use crate::task::TaskArena;
use shared::config::CentralQueueConfig;
use shared::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use tracing::debug;

/// Snapshot of one site's allocation-relevant state.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteStat {
    pub free_resources: i64,
    pub site_name: String,
    pub site_id: EntityId,
    pub is_leased: bool,
    pub expiration_ts: u64,
}

/// Site stats reachable two ways: by insertion slot and sorted ascending
/// by `(free_resources, slot)`. Slots are never reused, so insertion order
/// keeps breaking ties deterministically across add/remove churn.
#[derive(Debug, Default)]
pub struct SiteStatIndex {
    slots: Vec<Option<SiteStat>>,
    by_free: BTreeSet<(i64, usize)>,
    slot_of_site: BTreeMap<EntityId, usize>,
    pub total_available_resources: i64,
}

impl SiteStatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slot_of_site.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_of_site.is_empty()
    }

    pub fn contains_site(&self, site_id: EntityId) -> bool {
        self.slot_of_site.contains_key(&site_id)
    }

    pub fn slot_of_site(&self, site_id: EntityId) -> Option<usize> {
        self.slot_of_site.get(&site_id).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&SiteStat> {
        self.slots.get(slot).and_then(|entry| entry.as_ref())
    }

    pub fn add(&mut self, stat: SiteStat) {
        let slot = self.slots.len();
        self.total_available_resources += stat.free_resources;
        self.by_free.insert((stat.free_resources, slot));
        self.slot_of_site.insert(stat.site_id, slot);
        self.slots.push(Some(stat));
    }

    pub fn remove_site(&mut self, site_id: EntityId) {
        if let Some(slot) = self.slot_of_site.remove(&site_id) {
            if let Some(stat) = self.slots[slot].take() {
                self.by_free.remove(&(stat.free_resources, slot));
                self.total_available_resources -= stat.free_resources;
            }
        }
    }

    /// Rewrites one slot's free resources, keeping both orderings and the
    /// running total in step.
    pub fn set_free_resources(&mut self, slot: usize, new_free: i64) {
        if let Some(stat) = self.slots[slot].as_mut() {
            let old_free = stat.free_resources;
            self.by_free.remove(&(old_free, slot));
            self.by_free.insert((new_free, slot));
            stat.free_resources = new_free;
            self.total_available_resources += new_free - old_free;
        }
    }

    /// Ascending iteration starting at the first entry with
    /// `free_resources >= free`, i.e. `bisect_left((free, any))`.
    pub fn iter_from_free(&self, free: i64) -> impl Iterator<Item = (usize, &SiteStat)> {
        self.by_free
            .range((free, 0)..)
            .filter_map(|&(_, slot)| self.slots[slot].as_ref().map(|stat| (slot, stat)))
    }

    /// Slots ordered from the freest site down, insertion order breaking
    /// ties.
    pub fn slots_by_descending_free(&self) -> Vec<usize> {
        let mut entries: Vec<(i64, usize)> = self.by_free.iter().copied().collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        entries.into_iter().map(|(_, slot)| slot).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SiteStat)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|stat| (slot, stat)))
    }

    /// Both orderings must always describe the same records and the total
    /// must equal the sum of free resources. Used by tests and debug
    /// assertions.
    pub fn check_consistency(&self) -> bool {
        let live: BTreeSet<(i64, usize)> = self
            .iter()
            .map(|(slot, stat)| (stat.free_resources, slot))
            .collect();
        let total: i64 = self.iter().map(|(_, stat)| stat.free_resources).sum();
        live == self.by_free
            && total == self.total_available_resources
            && self.slot_of_site.len() == live.len()
    }
}

/// Central queue for new tasks.
#[derive(Debug)]
pub struct CentralQueue {
    pub id: EntityId,
    pub n_ticks_monitor_site_status: u64,
    pub user_metrics_filename: String,

    pub submitted_tasks_count: u64,
    pub finished_tasks_count: u64,

    pending_dependencies: BTreeSet<(u64, TaskId)>,
    submitted_future: BTreeSet<(u64, TaskId)>,
    ready: BTreeSet<(u64, TaskId)>,

    pub index: SiteStatIndex,
}

impl CentralQueue {
    pub fn new(id: EntityId, config: &CentralQueueConfig) -> Self {
        Self {
            id,
            n_ticks_monitor_site_status: config.n_ticks_monitor_site_status,
            user_metrics_filename: config.user_metrics_filename.clone(),
            submitted_tasks_count: 0,
            finished_tasks_count: 0,
            pending_dependencies: BTreeSet::new(),
            submitted_future: BTreeSet::new(),
            ready: BTreeSet::new(),
            index: SiteStatIndex::new(),
        }
    }

    /// Admits the initial workload. With `first_submission_at_zero` every
    /// submit tick is shifted so the earliest one becomes zero.
    pub fn set_task_list(
        &mut self,
        tasks: &mut TaskArena,
        task_ids: &[TaskId],
        first_submission_at_zero: bool,
    ) {
        if first_submission_at_zero && !task_ids.is_empty() {
            let first_ts_submit = task_ids
                .iter()
                .filter_map(|&id| tasks.get(id))
                .map(|task| task.ts_submit)
                .min()
                .unwrap_or(0);
            for &id in task_ids {
                if let Some(task) = tasks.get_mut(id) {
                    task.ts_submit = task.ts_submit.saturating_sub(first_ts_submit);
                }
            }
        }

        for &id in task_ids {
            self.admit(tasks, id);
        }
    }

    /// Used to resubmit tasks that have been interrupted.
    pub fn extend_task_list(&mut self, tasks: &TaskArena, task_ids: &[TaskId]) {
        self.submitted_tasks_count -= task_ids.len() as u64;
        for &id in task_ids {
            self.admit(tasks, id);
        }
    }

    fn admit(&mut self, tasks: &TaskArena, id: TaskId) {
        let Some(task) = tasks.get(id) else {
            return;
        };
        if task.dependencies.is_empty() {
            self.submitted_future.insert((task.ts_submit, id));
        } else {
            self.pending_dependencies.insert((task.ts_submit, id));
        }
    }

    /// Promotes every dependency-free task whose submit tick has been
    /// reached, then returns the ready set in submit order.
    pub fn tasks_to_schedule(&mut self, ts_now: u64) -> Vec<TaskId> {
        while let Some(&(ts_submit, id)) = self.submitted_future.first() {
            if ts_submit > ts_now {
                break;
            }
            self.submitted_future.remove(&(ts_submit, id));
            self.ready.insert((ts_submit, id));
        }

        self.ready.iter().map(|&(_, id)| id).collect()
    }

    /// Called by a parent's completion when a dependent task's last
    /// dependency clears.
    pub fn promote_dependency_free(&mut self, ts_submit: u64, id: TaskId) {
        if self.pending_dependencies.remove(&(ts_submit, id)) {
            self.submitted_future.insert((ts_submit, id));
        }
    }

    /// Removes a placed task from the ready set.
    pub fn remove_ready(&mut self, ts_submit: u64, id: TaskId) {
        self.ready.remove(&(ts_submit, id));
    }

    pub fn has_remaining_tasks(&self) -> bool {
        !self.ready.is_empty()
            || !self.submitted_future.is_empty()
            || !self.pending_dependencies.is_empty()
    }

    /// Submit tick of the earliest known task, ready tasks first.
    pub fn ts_of_next_task(&self) -> Option<u64> {
        self.ready
            .first()
            .or_else(|| self.submitted_future.first())
            .or_else(|| self.pending_dependencies.first())
            .map(|&(ts_submit, _)| ts_submit)
    }

    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready.iter().map(|&(_, id)| id)
    }

    pub fn pending_dependency_tasks(&self) -> impl Iterator<Item = (u64, TaskId)> + '_ {
        self.pending_dependencies.iter().copied()
    }

    pub fn submitted_future_tasks(&self) -> impl Iterator<Item = (u64, TaskId)> + '_ {
        self.submitted_future.iter().copied()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn queued_task_count(&self) -> usize {
        self.pending_dependencies.len() + self.submitted_future.len()
    }

    /// The three collections must stay disjoint. Used by tests.
    pub fn check_partition(&self) -> bool {
        let pending: BTreeSet<TaskId> =
            self.pending_dependencies.iter().map(|&(_, id)| id).collect();
        let future: BTreeSet<TaskId> = self.submitted_future.iter().map(|&(_, id)| id).collect();
        let ready: BTreeSet<TaskId> = self.ready.iter().map(|&(_, id)| id).collect();

        pending.intersection(&future).count() == 0
            && pending.intersection(&ready).count() == 0
            && future.intersection(&ready).count() == 0
    }

    /// Builds the index record for a site: free resources are what is
    /// neither in use nor spoken for by the local queue.
    pub fn site_stat_for(site: &Site, tasks: &TaskArena) -> SiteStat {
        let committed: i64 = site
            .task_queue
            .iter()
            .filter_map(|&id| tasks.get(id))
            .map(|task| task.cpus as i64)
            .sum();
        SiteStat {
            free_resources: site.free_resources() as i64 - committed,
            site_name: site.name.clone(),
            site_id: site.id,
            is_leased: site.leased_instance,
            expiration_ts: site.expiration_ts,
        }
    }

    pub fn add_site_stats(&mut self, site: &Site, tasks: &TaskArena) {
        let stat = Self::site_stat_for(site, tasks);
        self.index.add(stat);
    }

    pub fn remove_site_stats(&mut self, site_id: EntityId) {
        self.index.remove_site(site_id);
    }
}

impl SystemSim {
    /// MONITOR_SITE_STATUS handler: refresh every running site's free
    /// resources in the index and drop sites seen in shutdown, then re-arm.
    pub(crate) fn cq_monitor_sites(&mut self) {
        let mut removed: Vec<EntityId> = Vec::new();

        for (&site_id, site) in &self.sites {
            if site.status == SiteStatus::Shutdown {
                removed.push(site_id);
                continue;
            }

            let stat = CentralQueue::site_stat_for(site, &self.tasks);
            match self.central_queue.index.slot_of_site(site_id) {
                Some(slot) => {
                    self.central_queue
                        .index
                        .set_free_resources(slot, stat.free_resources);
                }
                None => self.central_queue.index.add(stat),
            }
        }

        for site_id in removed {
            self.central_queue.remove_site_stats(site_id);
        }

        debug_assert!(self.central_queue.index.check_consistency());

        // schedule the next monitoring event
        self.events.enqueue(Event::new(
            self.ts_now + self.central_queue.n_ticks_monitor_site_status,
            self.central_queue.id,
            self.central_queue.id,
            EventKind::MonitorSiteStatus,
        ));
    }

    /// TASK_DONE_USER handler: account the completion, advance workflow
    /// state and release dependent tasks.
    pub(crate) fn cq_task_done(&mut self, task_id: TaskId) -> Result<()> {
        self.central_queue.finished_tasks_count += 1;

        let task = self.tasks.require(task_id)?;
        let workflow_id = task.workflow_id;
        let is_entry = task.parents.is_empty();
        let is_exit = task.children.is_empty();
        let children = task.children.clone();
        let ts_start = task.ts_start.unwrap_or(self.ts_now);
        let ts_end = task.ts_end.unwrap_or(self.ts_now);

        if let Some(workflow_id) = workflow_id {
            let workflow = self.workflows.get_mut(&workflow_id).ok_or_else(|| {
                shared::SimulatorError::Invariant(format!(
                    "task {} references unknown workflow {}",
                    task_id, workflow_id
                ))
            })?;

            // Entry tasks mark the workflow started here rather than when
            // they begin running, because a running task can still be
            // interrupted and resubmitted.
            if is_entry && !workflow.workflow_started() {
                workflow.start(ts_start)?;
            }

            if is_exit && workflow.workflow_completed(&self.tasks) {
                workflow.ts_finish = Some(ts_end);
            }
        }

        for child_id in children {
            let child = self.tasks.require_mut(child_id)?;
            child.dependencies.remove(&task_id);
            if child.dependencies.is_empty() {
                let ts_submit = child.ts_submit;
                self.central_queue
                    .promote_dependency_free(ts_submit, child_id);
            }
        }

        Ok(())
    }

    /// Writes the user metrics report:
    /// first line `completed_workflows total_workflows tasks_per_hour`,
    /// then one line per completed workflow:
    /// `id makespan response_time critical_path_length`.
    pub(crate) fn cq_report_stats(&mut self) -> Result<()> {
        let path = self.output.join(&self.central_queue.user_metrics_filename);
        let mut writer = std::io::BufWriter::new(std::fs::File::create(&path)?);

        let mut completed: Vec<u64> = Vec::new();
        let workflow_ids: Vec<u64> = self.workflows.keys().copied().collect();
        for id in workflow_ids {
            let Some(workflow) = self.workflows.get_mut(&id) else {
                continue;
            };
            if workflow.workflow_completed(&self.tasks) {
                completed.push(id);
            }
        }

        writeln!(
            writer,
            "{} {} {}",
            completed.len(),
            self.workflows.len(),
            self.central_queue.finished_tasks_count as f64 / 3600.0
        )?;

        for id in &completed {
            let Some(workflow) = self.workflows.get(id) else {
                continue;
            };
            let ts_start = workflow.ts_start.unwrap_or(0);
            let ts_finish = workflow.ts_finish.unwrap_or(ts_start);
            let makespan = ts_finish - ts_start;
            let response_time = (ts_start - workflow.ts_submit.min(ts_start)) + makespan;
            writeln!(
                writer,
                "{} {} {} {}",
                workflow.id, makespan, response_time, workflow.critical_path_length
            )?;
        }

        writer.flush()?;
        debug!(path = %path.display(), "wrote user metrics");
        Ok(())
    }
}
