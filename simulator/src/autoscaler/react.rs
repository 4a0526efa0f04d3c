//! React: purely reactive scaling on the current load
//!
//! Prediction is the load itself (in server units) plus a two-unit safety
//! buffer. Downscaling only happens once capacity exceeds the load by more
//! than two units, which keeps the policy from thrashing around the
//! demand line.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::sim::SystemSim;
use shared::Result;
use tracing::debug;

pub struct ReactPolicy;

impl ReactPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReactPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalingPolicy for ReactPolicy {
    fn name(&self) -> &'static str {
        "React"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let total_load = sim.get_total_load() as f64 / core.server_speed;
        let current_capacity = sim.get_current_capacity();

        let mut outcome = ScaleOutcome {
            prev_capacity: current_capacity,
            ..ScaleOutcome::default()
        };

        let missing_capacity = total_load - current_capacity as f64;
        if missing_capacity >= 0.0 {
            core.autoscale_op = 1;
            outcome.target = (missing_capacity + 2.0).ceil() as u64;
            outcome.prediction = (current_capacity + outcome.target) as f64;
            outcome.mutation = sim.start_up_best_effort(outcome.target, false)?;
            debug!(mutation = outcome.mutation, target = outcome.target, "upscaled");
        } else if missing_capacity < -2.0 {
            core.autoscale_op = -1;
            outcome.target = (-missing_capacity + 2.0).ceil() as u64;
            outcome.prediction = current_capacity as f64 - outcome.target as f64;
            outcome.mutation = sim.release_resources_best_effort(outcome.target, true, false)?;
            debug!(mutation = outcome.mutation, target = outcome.target, "downscaled");
        }

        Ok(outcome)
    }
}
