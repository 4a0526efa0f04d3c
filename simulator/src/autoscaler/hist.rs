//! Hist: histogram of load per hour of day, percentile-based
//!
//! Every evaluation records the load (in server units) into the bucket for
//! the current hour of day. The estimate is the configured percentile of
//! that bucket, corrected by the mean estimation error over a long error
//! window. When at least six of the last ten errors were underestimations
//! the policy reacts immediately with a buffered upscale and starts its
//! error history afresh.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::sim::SystemSim;
use shared::utils::hour_and_day_for_ts;
use shared::Result;
use tracing::debug;

const ERROR_WINDOW: usize = 7200;

pub struct HistPolicy {
    percentile: f64,
    error_past_hours: Vec<i64>,
    histogram: Vec<Vec<i64>>,
}

impl HistPolicy {
    pub fn new(percentile: f64) -> Self {
        Self {
            percentile,
            error_past_hours: Vec::new(),
            histogram: vec![Vec::new(); 24],
        }
    }

    fn estimate_amount_of_tasks(&mut self, hour: usize, current_capacity: u64) -> i64 {
        let mut total_error = 0;
        if self.error_past_hours.len() == ERROR_WINDOW {
            total_error = self.error_past_hours.iter().sum::<i64>() / ERROR_WINDOW as i64;
            self.error_past_hours.drain(..ERROR_WINDOW / 2);
        }

        let predictor = &mut self.histogram[hour];
        predictor.sort_unstable();

        if predictor.is_empty() {
            return total_error;
        }

        let rank = ((predictor.len() as f64 * self.percentile) as usize).min(predictor.len() - 1);
        predictor[rank] + total_error - current_capacity as i64
    }

    /// Reactive correction once underestimation becomes chronic: the
    /// current load plus a two-unit buffer, but only while actually
    /// under-provisioned.
    fn hist_repair(load: i64, current_capacity: u64) -> Option<i64> {
        if load > current_capacity as i64 {
            Some(load + 2)
        } else {
            None
        }
    }
}

impl ScalingPolicy for HistPolicy {
    fn name(&self) -> &'static str {
        "Hist"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let current_load = sim.get_total_load();
        let current_capacity = sim.get_current_capacity();

        let server_load = (current_load as f64 / core.server_speed).ceil() as i64;
        self.error_past_hours
            .push(current_capacity as i64 - server_load);

        let (hour, _day) = hour_and_day_for_ts(sim.ts_now);
        self.histogram[hour].push(server_load);

        let mut results = self.estimate_amount_of_tasks(hour, current_capacity);
        debug!(estimate = results, "initial machine estimate");

        let underestimations = self
            .error_past_hours
            .iter()
            .rev()
            .take(10)
            .filter(|&&error| error < 0)
            .count();
        if underestimations > 5 {
            if let Some(repair) = Self::hist_repair(server_load, current_capacity) {
                results += repair;
            }
            self.error_past_hours.clear();
        }

        debug!(estimate = results, "estimated machines needed");

        let mut outcome = ScaleOutcome {
            prediction: (current_capacity as i64 + results) as f64,
            prev_capacity: current_capacity,
            target: results.unsigned_abs(),
            ..ScaleOutcome::default()
        };

        if results < 0 {
            core.autoscale_op = -1;
            outcome.mutation =
                sim.release_resources_best_effort(results.unsigned_abs(), true, false)?;
        } else if results > 0 {
            core.autoscale_op = 1;
            outcome.mutation = sim.start_up_best_effort(results as u64, false)?;
        }

        debug!(mutation = outcome.mutation, "scaling applied");
        Ok(outcome)
    }
}
