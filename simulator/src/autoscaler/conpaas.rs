//! ConPaaS: model-based forecasting over a load observation window
//!
//! Until the window has filled, the policy behaves reactively. Afterwards
//! it runs auto-regressive, linear-regression and exponential-smoothing
//! forecasters over the last twenty observations and scales toward the
//! weight-averaged forecast of the selected model. Very low load bypasses
//! the models entirely and shrinks toward a single unit.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::sim::SystemSim;
use crate::stats::{auto_regression, exponential_smoothing, linear_regression, weighted_average};
use shared::Result;
use tracing::debug;

const WINDOW: usize = 20;
const SMOOTHING_SPAN: usize = 2;

pub struct ConpaasPolicy {
    load_servers: Vec<f64>,
    /// Which forecaster feeds the final weighted average:
    /// 0 = auto-regression, 1 = linear regression, 2 = smoothing.
    forecast_model_selected: usize,
}

impl ConpaasPolicy {
    pub fn new() -> Self {
        Self {
            load_servers: Vec::new(),
            forecast_model_selected: 0,
        }
    }

    fn prediction_evaluation(&self, window: &[f64]) -> f64 {
        let forecasts = [
            auto_regression(window, WINDOW),
            linear_regression(window, WINDOW),
            exponential_smoothing(window, SMOOTHING_SPAN, WINDOW),
        ];

        weighted_average(&forecasts[self.forecast_model_selected])
    }
}

impl Default for ConpaasPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalingPolicy for ConpaasPolicy {
    fn name(&self) -> &'static str {
        "ConPaaS"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let server_speed = core.server_speed;
        let current_capacity = sim.get_current_capacity();
        let current_load = sim.get_total_load() as f64;

        self.load_servers.push(current_load);

        let predicted = if self.load_servers.len() <= WINDOW {
            (current_load / server_speed).ceil()
        } else if current_load > server_speed {
            let window = &self.load_servers[self.load_servers.len() - WINDOW..];
            let forecast = (self.prediction_evaluation(window) / server_speed).ceil();
            if forecast > 0.0 {
                forecast
            } else {
                current_capacity as f64
            }
        } else {
            // negligible load: shrink toward one unit and forget the
            // oldest observation
            self.load_servers.remove(0);
            1.0
        };

        let mut outcome = ScaleOutcome {
            prediction: predicted,
            prev_capacity: current_capacity,
            target: (current_capacity as f64 - predicted).abs() as u64,
            ..ScaleOutcome::default()
        };

        if (current_capacity as f64) > predicted {
            core.autoscale_op = -1;
            outcome.mutation = sim.release_resources_best_effort(
                (current_capacity as f64 - predicted) as u64,
                true,
                false,
            )?;
        } else if predicted > current_capacity as f64 {
            core.autoscale_op = 1;
            outcome.mutation =
                sim.start_up_best_effort((predicted - current_capacity as f64) as u64, false)?;
        }

        debug!(predicted, mutation = outcome.mutation, "conpaas scaling applied");
        Ok(outcome)
    }
}
