//! Adapt: PID-style controller combining proactive and reactive repair
//!
//! The controller estimates a per-unit service rate and a demand rate from
//! time-weighted capacity averages, folds them into a correction `R`, and
//! accumulates `R` in a repair bucket. Bucket overflow triggers proactive
//! scaling; independently, a reactive rule keeps capacity at least two
//! units above the load. The numeric constants (the /15 damping of
//! negative corrections, the two-unit buffers) are part of the policy's
//! contract and must not be tuned.

use super::{AutoscalerCore, ScaleOutcome, ScalingPolicy};
use crate::sim::SystemSim;
use shared::Result;
use tracing::debug;

pub struct AdaptPolicy {
    requests: f64,
    n_machines: f64,
    delta_t: f64,
    repair_c: f64,
    u_estimate: f64,
    p_estimate: f64,
    avg_n: f64,
    r: f64,
    avg_capacity: f64,
    decision_capacity: f64,
    sigma_alive: f64,
    initial_time: u64,
    time_previous: u64,
    time_last_estimation: u64,
    gamma_time: u64,
    capacity_list: Vec<(f64, f64)>,
}

impl AdaptPolicy {
    pub fn new(ts_now: u64) -> Self {
        Self {
            requests: 0.0,
            n_machines: 0.0,
            delta_t: 1.0,
            repair_c: 0.0,
            u_estimate: 0.0,
            p_estimate: 0.0,
            avg_n: 0.0,
            r: 0.0,
            avg_capacity: 0.0,
            decision_capacity: 0.0,
            sigma_alive: 1.0,
            initial_time: ts_now,
            time_previous: ts_now,
            time_last_estimation: ts_now,
            gamma_time: ts_now,
            capacity_list: Vec::new(),
        }
    }

    fn estimator(&mut self, t: f64, delta_load: f64, d: f64) {
        self.avg_n = self.sigma_alive / t;
        self.u_estimate = self.avg_capacity / self.avg_n;
        self.p_estimate = delta_load / self.avg_n;
        self.delta_t = if self.avg_capacity != 0.0 {
            (d / self.avg_capacity).ceil()
        } else {
            1.0
        };
    }

    fn controller(&mut self, delta_time: f64) {
        self.r = self.u_estimate * self.p_estimate * self.avg_n;
        if self.r < 0.0 {
            self.r /= 15.0;
        } else {
            self.r /= delta_time.max(1.0);
        }
    }

    fn proactive_repair(&mut self, server_speed: f64, current_capacity: f64) -> Option<f64> {
        self.repair_c += self.r;

        if self.repair_c < 0.0 {
            let s = self.repair_c.trunc();
            self.repair_c -= s;

            if current_capacity + s.abs() >= (self.requests / server_speed).ceil() + 2.0 {
                self.decision_capacity += s.ceil();
                return Some(-s.abs());
            }
            if s < 0.0 {
                self.decision_capacity = (self.requests / server_speed).ceil() + 2.0;
                return Some(-(self.n_machines - self.decision_capacity).ceil().abs() - 1.0);
            }
            None
        } else if self.repair_c >= 1.0 {
            let proactive = self.repair_c.trunc();
            self.repair_c -= proactive;
            Some(proactive)
        } else {
            None
        }
    }

    fn react_repair(load: f64, current_capacity: f64, proactive: Option<f64>) -> f64 {
        let reactive = load.ceil() - current_capacity + 2.0;

        match proactive {
            Some(proactive) => {
                if load > current_capacity {
                    if reactive > proactive {
                        reactive - proactive
                    } else if reactive < proactive {
                        proactive
                    } else {
                        reactive
                    }
                } else {
                    proactive
                }
            }
            None => reactive,
        }
    }
}

impl ScalingPolicy for AdaptPolicy {
    fn name(&self) -> &'static str {
        "Adapt"
    }

    fn evaluate(
        &mut self,
        sim: &mut SystemSim,
        core: &mut AutoscalerCore,
    ) -> Result<ScaleOutcome> {
        let server_speed = core.server_speed;
        let current_time = sim.ts_now;
        let current_capacity = sim.get_current_capacity();
        let current_load = sim.get_total_load() as f64;

        let d = 0.01 * current_capacity as f64;
        let load_servers = (current_load / server_speed).ceil();

        let delta_time = (current_time - self.time_previous) as f64;
        debug!(delta_time, "adapt controller step");
        self.time_previous = current_time;

        let x = (current_time - self.time_last_estimation) as f64;
        self.capacity_list
            .push((current_capacity as f64, delta_time));

        if (current_time - self.gamma_time) as f64 >= self.delta_t.ceil() {
            let weighted: f64 = self
                .capacity_list
                .iter()
                .map(|&(capacity, dt)| capacity * dt)
                .sum();
            self.avg_capacity = weighted / (current_time - self.gamma_time) as f64;
            self.gamma_time = current_time;
            self.capacity_list.clear();
        }

        if x >= self.delta_t {
            let delta_load = load_servers - current_capacity as f64;
            let t_calc = (current_time - self.initial_time) as f64;
            self.estimator(t_calc.max(1.0), delta_load, d);
            self.controller(delta_time);
            self.time_last_estimation = current_time;
        }

        let proactive = self.proactive_repair(server_speed, current_capacity as f64);
        let results = Self::react_repair(load_servers, current_capacity as f64, proactive);
        self.sigma_alive += current_capacity as f64;
        self.n_machines = current_capacity as f64;

        debug!(results, "final estimated capacity");

        let mut outcome = ScaleOutcome {
            prediction: results,
            prev_capacity: current_capacity,
            target: (results - current_capacity as f64).abs() as u64,
            ..ScaleOutcome::default()
        };

        if results > current_capacity as f64 {
            core.autoscale_op = 1;
            outcome.mutation =
                sim.start_up_best_effort((results - current_capacity as f64) as u64, false)?;
        } else if (current_capacity as f64) > results {
            core.autoscale_op = -1;
            outcome.mutation = sim.release_resources_best_effort(
                (current_capacity as f64 - results) as u64,
                true,
                false,
            )?;
        }

        Ok(outcome)
    }
}
