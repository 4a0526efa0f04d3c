//! Reg: quadratic regression over a sliding load window
//!
//! While under-provisioned the policy follows the load directly. Once
//! capacity exceeds the load it fits a degree-2 polynomial through the
//! recent (tick, load) history and projects it to the current tick; a
//! projection above the current capacity is treated as noise and clamped
//! to zero, which lets the policy release resources.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::sim::SystemSim;
use crate::stats::quadratic_fit_at;
use shared::Result;
use std::collections::VecDeque;
use tracing::debug;

const WINDOW: usize = 72;

pub struct RegPolicy {
    past_time: VecDeque<f64>,
    past_load: VecDeque<f64>,
}

impl RegPolicy {
    pub fn new() -> Self {
        Self {
            past_time: VecDeque::with_capacity(WINDOW),
            past_load: VecDeque::with_capacity(WINDOW),
        }
    }

    fn push(&mut self, ts: f64, load: f64) {
        if self.past_time.len() == WINDOW {
            self.past_time.pop_front();
            self.past_load.pop_front();
        }
        self.past_time.push_back(ts);
        self.past_load.push_back(load);
    }
}

impl Default for RegPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalingPolicy for RegPolicy {
    fn name(&self) -> &'static str {
        "Reg"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let total_load = sim.get_total_load() as f64 / core.server_speed;
        let current_capacity = sim.get_current_capacity();

        self.push(sim.ts_now as f64, total_load);

        let future_load = if (current_capacity as f64) > total_load {
            let xs: Vec<f64> = self.past_time.iter().copied().collect();
            let ys: Vec<f64> = self.past_load.iter().copied().collect();
            let mut projection = quadratic_fit_at(&xs, &ys, sim.ts_now as f64).ceil();
            if projection > current_capacity as f64 {
                projection = 0.0;
            }
            projection
        } else {
            total_load
        };

        let mut outcome = ScaleOutcome {
            prediction: future_load,
            prev_capacity: current_capacity,
            ..ScaleOutcome::default()
        };

        let target = future_load - current_capacity as f64;
        if target > 0.0 {
            core.autoscale_op = 1;
            outcome.target = target as u64;
            outcome.mutation = sim.start_up_best_effort(outcome.target, false)?;
            debug!(mutation = outcome.mutation, target = outcome.target, "upscaled");
        } else if target < 0.0 {
            core.autoscale_op = -1;
            outcome.target = (-target) as u64;
            outcome.mutation = sim.release_resources_best_effort(outcome.target, true, false)?;
            debug!(mutation = outcome.mutation, target = outcome.target, "downscaled");
        }

        Ok(outcome)
    }
}
