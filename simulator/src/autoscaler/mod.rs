//! Pluggable elasticity policies
//!
//! An autoscaler evaluates periodically: it predicts the capacity the
//! immediate future needs, asks the resource manager to close the gap
//! best-effort, logs the operation and accumulates the elasticity KPIs
//! (under/overprovisioning areas and times, instability, cost). The
//! prediction rule is the only thing a concrete policy supplies.

mod adapt;
mod conpaas;
mod hist;
mod plan;
mod react;
mod reg;
pub(crate) mod token;

pub use adapt::AdaptPolicy;
pub use conpaas::ConpaasPolicy;
pub use hist::HistPolicy;
pub use plan::PlanPolicy;
pub use react::ReactPolicy;
pub use reg::RegPolicy;
pub use token::{TokenModPolicy, TokenPolicy};

use crate::kernel::{EntityId, EntityKind, Event, EventKind};
use crate::sim::SystemSim;
use shared::config::AutoscalerConfig;
use shared::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const CHARGE_PERIOD: f64 = 3600.0;
const CHARGE_COST: f64 = 1.0;
const EPSILON: f64 = 1.0;

/// What one evaluation did: the predicted supply, the capacity before the
/// scaling operation, the requested delta and what was actually attained.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleOutcome {
    pub prediction: f64,
    pub prev_capacity: u64,
    pub target: u64,
    pub mutation: u64,
}

/// A concrete elasticity policy: computes a prediction and performs the
/// scaling calls, leaving logging and KPI accounting to the framework.
pub trait ScalingPolicy {
    fn name(&self) -> &'static str;

    fn evaluate(&mut self, sim: &mut SystemSim, core: &mut AutoscalerCore)
        -> Result<ScaleOutcome>;
}

/// Shared autoscaler state: evaluation cadence, KPI accumulators and the
/// four output logs.
pub struct AutoscalerCore {
    pub n_ticks_per_evaluate: u64,
    pub server_speed: f64,
    delta_t: f64,

    pub autoscale_steps: u64,
    /// Direction of the current evaluation's scaling operation:
    /// +1 up, -1 down, 0 none. Reset after logging.
    pub autoscale_op: i64,

    underprovisioning: f64,
    overprovisioning: f64,
    underprovisioning_normalized: f64,
    overprovisioning_normalized: f64,
    overprovisioning_mu: f64,
    time_underprovisioning: f64,
    time_overprovisioning: f64,
    instability_k: f64,
    instability_k_prime: f64,
    average_resources: f64,
    average_charged_cpu_hours: f64,

    ops_log: BufWriter<File>,
    elasticity_log: BufWriter<File>,
    cost_log: BufWriter<File>,
    overview_log: BufWriter<File>,
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl AutoscalerCore {
    pub fn new(output_dir: &Path, config: &AutoscalerConfig) -> Result<Self> {
        let open = |filename: &str| -> Result<BufWriter<File>> {
            Ok(BufWriter::new(File::create(output_dir.join(filename))?))
        };

        Ok(Self {
            n_ticks_per_evaluate: config.n_ticks_per_evaluate,
            server_speed: config.server_speed,
            delta_t: config.n_ticks_per_evaluate as f64,
            autoscale_steps: 0,
            autoscale_op: 0,
            underprovisioning: 0.0,
            overprovisioning: 0.0,
            underprovisioning_normalized: 0.0,
            overprovisioning_normalized: 0.0,
            overprovisioning_mu: 0.0,
            time_underprovisioning: 0.0,
            time_overprovisioning: 0.0,
            instability_k: 0.0,
            instability_k_prime: 0.0,
            average_resources: 0.0,
            average_charged_cpu_hours: 0.0,
            ops_log: open(&config.ops_filename)?,
            elasticity_log: open(&config.elasticity_metrics_filename)?,
            cost_log: open(&config.cost_metrics_filename)?,
            overview_log: open(&config.elasticity_overview_filename)?,
        })
    }

    /// One line per evaluation: tick, supply after the scaling operation,
    /// the supply the target asked for, and the pending load.
    fn log_op(
        &mut self,
        ts_now: u64,
        prev_capacity: u64,
        mutation: u64,
        target: u64,
        pending_load: u64,
    ) -> Result<()> {
        writeln!(
            self.ops_log,
            "{}, {}, {}, {}",
            ts_now,
            prev_capacity as i64 + self.autoscale_op * mutation as i64,
            prev_capacity as i64 + self.autoscale_op * target as i64,
            pending_load
        )?;
        Ok(())
    }

    /// KPI accumulation for one evaluation interval.
    fn refresh_stats(
        &mut self,
        ts_now: u64,
        demand: f64,
        idle_resources: f64,
        supply: f64,
    ) -> Result<()> {
        let dt = self.delta_t;

        self.underprovisioning += (demand - supply).max(0.0) * dt;
        self.overprovisioning += (supply - demand).max(0.0) * dt;

        self.underprovisioning_normalized += (demand - supply).max(0.0) / demand.max(EPSILON) * dt;
        self.overprovisioning_normalized += (supply - demand).max(0.0) / supply.max(EPSILON) * dt;

        self.overprovisioning_mu += idle_resources * dt;

        self.time_underprovisioning += sign(demand - supply).max(0.0) * dt;
        self.time_overprovisioning += sign(supply - demand).max(0.0) * dt;

        // Direction flips are not meaningful on the very first evaluation.
        if self.autoscale_steps > 1 {
            self.instability_k += (sign(supply) - sign(demand)).clamp(0.0, 1.0) * dt;
            self.instability_k_prime += (sign(demand) - sign(supply)).clamp(0.0, 1.0) * dt;
        }

        self.average_resources += supply * dt;
        self.average_charged_cpu_hours +=
            (self.n_ticks_per_evaluate as f64 / CHARGE_PERIOD).ceil() * CHARGE_COST * supply;

        writeln!(
            self.elasticity_log,
            "{} {} {} {} {} {} {} {} {} {}",
            ts_now,
            self.underprovisioning,
            self.overprovisioning,
            self.underprovisioning_normalized,
            self.overprovisioning_normalized,
            self.time_underprovisioning,
            self.time_overprovisioning,
            self.instability_k,
            self.instability_k_prime,
            self.overprovisioning_mu,
        )?;

        writeln!(
            self.cost_log,
            "{} {} {}",
            ts_now, self.average_resources, self.average_charged_cpu_hours
        )?;

        Ok(())
    }

    /// Final KPI report: normalized percentages to the overview log, raw
    /// closing lines to the metrics logs.
    pub fn report_stats(&mut self, time_horizon: u64, cluster_resources: u64) -> Result<()> {
        let horizon = time_horizon as f64;
        let resources = cluster_resources as f64;
        let area = horizon * resources;

        let under_pct = self.underprovisioning / area * 100.0;
        let over_pct = self.overprovisioning / area * 100.0;
        let under_norm_pct = self.underprovisioning_normalized / horizon * 100.0;
        let over_norm_pct = self.overprovisioning_normalized / horizon * 100.0;
        let time_under_pct = self.time_underprovisioning / horizon * 100.0;
        let time_over_pct = self.time_overprovisioning / horizon * 100.0;
        let instability_k_pct = self.instability_k / (horizon - 1.0) * 100.0;
        let instability_k_prime_pct = self.instability_k_prime / (horizon - 1.0) * 100.0;
        let over_mu_pct = self.overprovisioning_mu / area * 100.0;
        let avg_resources = self.average_resources / horizon;
        let avg_accounted = avg_resources * 3600.0 / resources;
        let avg_charged = self.average_charged_cpu_hours / resources;

        info!(
            underprovisioning_accuracy = under_pct,
            overprovisioning_accuracy = over_pct,
            underprovisioning_normalized = under_norm_pct,
            overprovisioning_normalized = over_norm_pct,
            time_underprovisioned = time_under_pct,
            time_overprovisioned = time_over_pct,
            instability_k = instability_k_pct,
            instability_k_prime = instability_k_prime_pct,
            overprovisioning_mu = over_mu_pct,
            average_resources = avg_resources,
            average_charged_cpu_hours = avg_charged,
            "elasticity report"
        );

        writeln!(
            self.overview_log,
            "{}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}",
            under_pct,
            over_pct,
            under_norm_pct,
            over_norm_pct,
            time_under_pct,
            time_over_pct,
            instability_k_pct,
            instability_k_prime_pct,
            over_mu_pct,
            avg_resources,
            avg_accounted,
            avg_charged,
        )?;

        // last line carries the horizon and the cluster capacity
        writeln!(self.elasticity_log, "{} {}", time_horizon, cluster_resources)?;
        writeln!(self.cost_log, "{} {}", time_horizon, cluster_resources)?;

        self.ops_log.flush()?;
        self.elasticity_log.flush()?;
        self.cost_log.flush()?;
        self.overview_log.flush()?;
        Ok(())
    }
}

/// The autoscaler as a simulation entity.
pub struct AutoscalerEntity {
    pub id: EntityId,
    pub core: AutoscalerCore,
    pub policy: Box<dyn ScalingPolicy>,
}

impl SystemSim {
    /// Builds and registers the configured elasticity policy; an empty
    /// name leaves autoscaling off.
    pub(crate) fn attach_autoscaler(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }

        let config = self.config.autoscaler.clone();
        let policy: Box<dyn ScalingPolicy> = match name {
            "react" => Box::new(ReactPolicy::new()),
            "reg" => Box::new(RegPolicy::new()),
            "hist" => Box::new(HistPolicy::new(config.hist_percentile)),
            "plan" => Box::new(PlanPolicy::new(self.get_maximum_capacity()? as usize)),
            "token" => Box::new(TokenPolicy::new(
                config.token_time_threshold,
                config.token_max_capacity,
            )),
            "token_mod" => Box::new(TokenModPolicy::new(config.token_time_threshold)),
            "conpaas" => Box::new(ConpaasPolicy::new()),
            "adapt" => Box::new(AdaptPolicy::new(self.ts_now)),
            other => {
                return Err(shared::SimulatorError::Config(format!(
                    "unknown autoscaler '{}'",
                    other
                ))
                .into())
            }
        };

        let id = self.registry.add_entity(EntityKind::Autoscaler);
        let core = AutoscalerCore::new(&self.output, &config)?;
        info!(policy = policy.name(), "autoscaler attached");
        self.autoscaler = Some(AutoscalerEntity { id, core, policy });
        Ok(())
    }

    /// AUTO_SCALE_EVALUATE handler: one full evaluation cycle.
    pub(crate) fn autoscale_evaluate(&mut self) -> Result<()> {
        let Some(mut autoscaler) = self.autoscaler.take() else {
            return Ok(());
        };

        autoscaler.core.autoscale_steps += 1;
        let outcome = autoscaler.policy.evaluate(self, &mut autoscaler.core)?;

        let pending_load = self.get_pending_tasks_load();
        autoscaler.core.log_op(
            self.ts_now,
            outcome.prev_capacity,
            outcome.mutation,
            outcome.target,
            pending_load,
        )?;

        let supply = (outcome.prev_capacity as i64
            + autoscaler.core.autoscale_op * outcome.mutation as i64)
            .max(0) as f64;
        let demand = self.get_total_load() as f64;
        let idle = self.count_idle_resources() as f64;
        debug!(
            prediction = outcome.prediction,
            supply, demand, "autoscale evaluation"
        );
        autoscaler
            .core
            .refresh_stats(self.ts_now, demand, idle, supply)?;
        autoscaler.core.autoscale_op = 0;

        self.events.enqueue(Event::new(
            self.ts_now + autoscaler.core.n_ticks_per_evaluate,
            autoscaler.id,
            autoscaler.id,
            EventKind::AutoScaleEvaluate,
        ));

        self.autoscaler = Some(autoscaler);
        Ok(())
    }
}
