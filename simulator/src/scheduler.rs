//! Allocation policies of the meta-scheduler
//!
//! All three policies share the same event handler and re-arm rule; they
//! differ only in the order sites are considered for a given task:
//!
//! - best-fit: the fullest site the task still fits on;
//! - worst-fit: the freest site the task fits on;
//! - fill-worst-fit: walk sites from freest down and drain as many ready
//!   tasks into each as will fit before moving on.
//!
//! Ties always break by site insertion order, which the resource manager's
//! provisioning sequence makes deterministic.

use crate::kernel::{EntityId, Event, EventKind, TaskId};
use crate::sim::SystemSim;
use shared::{Result, SimulatorError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPolicy {
    BestFit,
    WorstFit,
    FillWorstFit,
}

impl AllocationPolicy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "bestfit" => Ok(Self::BestFit),
            "worstfit" => Ok(Self::WorstFit),
            "fillworstfit" => Ok(Self::FillWorstFit),
            other => {
                Err(SimulatorError::Config(format!("unknown scheduler '{}'", other)).into())
            }
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    pub id: EntityId,
    pub policy: AllocationPolicy,
    /// Minimum spacing between allocation passes while work remains.
    pub n_ticks_between_auto_reschedule: u64,
}

impl Scheduler {
    pub fn new(id: EntityId, policy: AllocationPolicy) -> Self {
        Self {
            id,
            policy,
            n_ticks_between_auto_reschedule: 1,
        }
    }
}

impl SystemSim {
    /// SCHEDULER_RESCHEDULE handler: place what fits now, then re-arm at
    /// `max(ts_now + 1, ts of the next known task)` while tasks remain
    /// anywhere in the central queue.
    pub(crate) fn scheduler_reschedule(&mut self) -> Result<()> {
        self.try_schedule_tasks()?;

        // If no tasks remain to assign, no future event for this component.
        if !self.central_queue.has_remaining_tasks() {
            return Ok(());
        }

        let next_task_ts = self.central_queue.ts_of_next_task().ok_or_else(|| {
            SimulatorError::Invariant("remaining tasks without a next submit tick".to_string())
        })?;
        let next_event_ts = next_task_ts
            .max(self.ts_now + self.scheduler.n_ticks_between_auto_reschedule);

        self.events.enqueue(Event::new(
            next_event_ts,
            self.scheduler.id,
            self.scheduler.id,
            EventKind::SchedulerReschedule,
        ));
        Ok(())
    }

    /// One allocation pass over the ready set. Only assigns a task when
    /// resources for it are available.
    pub fn try_schedule_tasks(&mut self) -> Result<()> {
        match self.scheduler.policy {
            AllocationPolicy::BestFit => self.schedule_single_fit(true),
            AllocationPolicy::WorstFit => self.schedule_single_fit(false),
            AllocationPolicy::FillWorstFit => self.schedule_fill_worst_fit(),
        }
    }

    /// Best-fit and worst-fit: one site per task, chosen from the
    /// ascending free-resources index (from below or from above).
    fn schedule_single_fit(&mut self, best_fit: bool) -> Result<()> {
        let ready = self.central_queue.tasks_to_schedule(self.ts_now);

        for task_id in ready {
            let (cpus, runtime, ts_submit) = {
                let task = self.tasks.require(task_id)?;
                (task.cpus as i64, task.runtime, task.ts_submit)
            };

            // A task wider than everything free can never be placed this
            // pass; with nothing free at all, neither can anyone else.
            if cpus > self.central_queue.index.total_available_resources {
                if self.central_queue.index.total_available_resources == 0 {
                    break;
                }
                continue;
            }

            let slot = if best_fit {
                self.find_best_fit_slot(cpus, runtime)
            } else {
                self.find_worst_fit_slot(cpus, runtime)
            };

            if let Some(slot) = slot {
                self.assign_task(task_id, ts_submit, cpus, slot)?;
            }
        }

        Ok(())
    }

    /// Smallest free-resources entry that fits, skipping leases that would
    /// expire mid-run.
    pub(crate) fn find_best_fit_slot(&self, cpus: i64, runtime: u64) -> Option<usize> {
        for (slot, stat) in self.central_queue.index.iter_from_free(cpus) {
            if stat.is_leased
                && stat.expiration_ts > 0
                && stat.expiration_ts < self.ts_now + runtime
            {
                continue;
            }
            return Some(slot);
        }
        None
    }

    /// Freest entry that fits: reverse-iterate the ascending index and
    /// stop at the first entry too small for the task.
    pub(crate) fn find_worst_fit_slot(&self, cpus: i64, runtime: u64) -> Option<usize> {
        for slot in self.central_queue.index.slots_by_descending_free() {
            let Some(stat) = self.central_queue.index.get(slot) else {
                continue;
            };
            if stat.free_resources < cpus {
                break;
            }
            if stat.is_leased
                && stat.expiration_ts > 0
                && stat.expiration_ts < self.ts_now + runtime
            {
                continue;
            }
            return Some(slot);
        }
        None
    }

    /// Fill-worst-fit: walk sites from freest down; for each site drain
    /// ready tasks in submit order while they fit.
    fn schedule_fill_worst_fit(&mut self) -> Result<()> {
        let ready = self.central_queue.tasks_to_schedule(self.ts_now);
        if ready.is_empty() {
            return Ok(());
        }

        let mut unassigned: Vec<TaskId> = ready;

        for slot in self.central_queue.index.slots_by_descending_free() {
            let Some(stat) = self.central_queue.index.get(slot) else {
                continue;
            };
            let mut free = stat.free_resources;
            let (is_leased, expiration_ts) = (stat.is_leased, stat.expiration_ts);

            if free <= 0 || unassigned.is_empty() {
                return Ok(());
            }

            // Candidates are fixed by the site's free resources at the
            // start of the drain; the running total still gates each
            // placement.
            let candidates: Vec<TaskId> = unassigned
                .iter()
                .copied()
                .filter(|&id| {
                    self.tasks
                        .get(id)
                        .is_some_and(|task| task.cpus as i64 <= free)
                })
                .collect();

            for task_id in candidates {
                let (cpus, runtime, ts_submit) = {
                    let task = self.tasks.require(task_id)?;
                    (task.cpus as i64, task.runtime, task.ts_submit)
                };
                if cpus > free {
                    break;
                }

                if is_leased && expiration_ts > 0 && expiration_ts < self.ts_now + runtime {
                    continue;
                }

                self.assign_task(task_id, ts_submit, cpus, slot)?;
                unassigned.retain(|&id| id != task_id);
                free -= cpus;
            }
        }

        Ok(())
    }

    /// Commits one placement: counters, ready-set removal, the ADD_TASK
    /// event, and the index update.
    fn assign_task(&mut self, task_id: TaskId, ts_submit: u64, cpus: i64, slot: usize) -> Result<()> {
        let stat = self.central_queue.index.get(slot).ok_or_else(|| {
            SimulatorError::Invariant(format!("site index slot {} is stale", slot))
        })?;
        let site_id = stat.site_id;
        let new_free = stat.free_resources - cpus;

        debug!(task = task_id, site = %stat.site_name, "assigning task");

        self.central_queue.submitted_tasks_count += 1;
        self.central_queue.remove_ready(ts_submit, task_id);

        self.events.enqueue(Event::new(
            self.ts_now,
            self.scheduler.id,
            site_id,
            EventKind::AddTask { task: task_id },
        ));

        self.central_queue.index.set_free_resources(slot, new_free);
        Ok(())
    }
}
