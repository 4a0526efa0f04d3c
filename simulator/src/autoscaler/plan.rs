//! Plan: simulated FCFS placement onto the maximum processor count
//!
//! Each evaluation replays the currently eligible work (running tasks plus
//! everything schedulable now, then wave after wave of their children)
//! onto one plan per processor of the catalog's maximum capacity. A task
//! lands on the emptiest plan whose last finish time can honor its
//! critical parent. The moment a plan would stretch past the next
//! evaluation interval, the replay stops; the number of non-empty plans is
//! the predicted level of parallelism.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::kernel::TaskId;
use crate::sim::SystemSim;
use crate::task::TaskStatus;
use shared::Result;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub struct PlanPolicy {
    max_plans: usize,
    plans: Vec<VecDeque<u64>>,
    finish_times: HashMap<TaskId, u64>,
}

impl PlanPolicy {
    pub fn new(max_plans: usize) -> Self {
        Self {
            max_plans,
            plans: Vec::new(),
            finish_times: HashMap::new(),
        }
    }

    fn level_of_parallelism(&self) -> u64 {
        self.plans.iter().filter(|plan| !plan.is_empty()).count() as u64
    }

    /// Latest finish among a task's parents in the simulated plan.
    fn max_parent_finish_time(&self, sim: &SystemSim, task_id: TaskId) -> u64 {
        let Some(task) = sim.tasks.get(task_id) else {
            return 0;
        };
        task.dependencies
            .iter()
            .map(|parent| self.finish_times.get(parent).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    /// Plan that can take the task the earliest: a still-empty plan when
    /// there is no parent constraint, otherwise the eligible plan with the
    /// smallest last finish time.
    fn pick_plan(&self, max_parent_finish: u64) -> Option<usize> {
        let mut first_empty = None;
        let mut min_plan: Option<(usize, u64)> = None;

        for (index, plan) in self.plans.iter().enumerate() {
            match plan.back() {
                None => {
                    if max_parent_finish == 0 && first_empty.is_none() {
                        first_empty = Some(index);
                    }
                }
                Some(&last) if last >= max_parent_finish => {
                    if min_plan.is_none_or(|(_, best)| last < best) {
                        min_plan = Some((index, last));
                    }
                }
                Some(_) => {}
            }
        }

        first_empty.or(min_plan.map(|(index, _)| index))
    }

    /// Places one wave of tasks. Returns true once the plan horizon
    /// crosses the next evaluation interval.
    fn place_tasks(
        &mut self,
        sim: &SystemSim,
        core: &AutoscalerCore,
        task_ids: &[TaskId],
    ) -> bool {
        for &task_id in task_ids {
            let max_parent_finish = self.max_parent_finish_time(sim, task_id);
            let Some(plan_index) = self.pick_plan(max_parent_finish) else {
                continue;
            };

            let min_start = self.plans[plan_index].back().copied().unwrap_or(0);
            if min_start >= core.n_ticks_per_evaluate {
                debug!("plan surpasses next autoscaling interval");
                return true;
            }

            let Some(task) = sim.tasks.get(task_id) else {
                continue;
            };
            let task_runtime = if task.status == TaskStatus::Running {
                task.ts_end.unwrap_or(sim.ts_now).saturating_sub(sim.ts_now)
            } else {
                task.runtime
            };

            let finish = min_start + task_runtime;
            self.plans[plan_index].push_back(finish);
            self.finish_times.insert(task_id, finish);
        }

        false
    }

    /// Tasks eligible right now: running everywhere plus schedulable at
    /// the central queue.
    fn entry_tasks(sim: &mut SystemSim) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = sim
            .sites
            .values()
            .flat_map(|site| site.running_tasks.values().copied())
            .collect();
        tasks.extend(sim.central_queue.tasks_to_schedule(sim.ts_now));
        tasks
    }

    fn predict(&mut self, sim: &mut SystemSim, core: &AutoscalerCore) -> u64 {
        self.plans = vec![VecDeque::new(); self.max_plans];
        self.finish_times.clear();

        let mut tasks = Self::entry_tasks(sim);
        while !tasks.is_empty() {
            if self.place_tasks(sim, core, &tasks) {
                break;
            }
            tasks = tasks
                .iter()
                .flat_map(|&id| {
                    sim.tasks
                        .get(id)
                        .map(|task| task.children.clone())
                        .unwrap_or_default()
                })
                .collect();
        }

        self.level_of_parallelism()
    }
}

impl ScalingPolicy for PlanPolicy {
    fn name(&self) -> &'static str {
        "Plan"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let prediction = self.predict(sim, core);
        let current_capacity = sim.get_current_capacity();

        let mut outcome = ScaleOutcome {
            prediction: prediction as f64,
            prev_capacity: current_capacity,
            ..ScaleOutcome::default()
        };

        let target = prediction as i64 - current_capacity as i64;
        outcome.target = target.unsigned_abs();
        if target > 0 {
            core.autoscale_op = 1;
            outcome.mutation = sim.start_up_best_effort(outcome.target, false)?;
            debug!(mutation = outcome.mutation, target = outcome.target, "upscaled");
        } else if target < 0 {
            core.autoscale_op = -1;
            outcome.mutation = sim.release_resources_best_effort(outcome.target, true, false)?;
            debug!(mutation = outcome.mutation, target = outcome.target, "downscaled");
        }

        Ok(outcome)
    }
}
