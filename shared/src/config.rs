//! Configuration types and validation for the simulator
//!
//! The configuration is a nested record mirroring the sections of the
//! simulator: `[experiment]`, `[simulation]`, `[central_queue]`,
//! `[autoscaler]`, `[site_monitor]` and `[system_monitor]`. It is loaded
//! from a TOML file or generated from command-line shortcuts, validated
//! once at startup, and saved into the output directory so every run is
//! reproducible from its artifacts.

use crate::defaults::*;
use crate::{Result, SimulatorError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Allocation policies recognized by `simulation.Scheduler`.
pub const SCHEDULER_NAMES: &[&str] = &["bestfit", "worstfit", "fillworstfit"];

/// Elasticity policies recognized by `simulation.Autoscaler`.
/// The empty string disables autoscaling.
pub const AUTOSCALER_NAMES: &[&str] = &[
    "react", "reg", "hist", "plan", "token", "token_mod", "conpaas", "adapt", "",
];

/// Top-level simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SimConfig {
    #[serde(default)]
    pub experiment: ExperimentConfig,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub central_queue: CentralQueueConfig,
    #[serde(default)]
    pub autoscaler: AutoscalerConfig,
    #[serde(default)]
    pub site_monitor: SiteMonitorConfig,
    #[serde(default)]
    pub system_monitor: SystemMonitorConfig,
}

/// `[experiment]` section: used only to nest the output directory so
/// repeated runs of the same experiment don't overwrite each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExperimentConfig {
    #[serde(rename = "ID", default = "default_experiment_id")]
    pub id: String,
    #[serde(rename = "ITERATION", default = "default_experiment_iteration")]
    pub iteration: String,
}

/// `[simulation]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    /// Simulation horizon in ticks. The only key without a default.
    #[serde(rename = "N_TICKS")]
    pub n_ticks: u64,
    #[serde(rename = "OUTPUT_DIR", default = "default_output_dir")]
    pub output_dir: String,
    #[serde(
        rename = "RUNTIME_OUTPUT_FILENAME",
        default = "default_runtime_output_filename"
    )]
    pub runtime_output_filename: String,
    #[serde(rename = "DBLog", default = "default_db_log")]
    pub db_log: String,
    #[serde(rename = "DBLoggingEnabled", default = "default_db_logging_enabled")]
    pub db_logging_enabled: bool,
    #[serde(rename = "DBStats", default = "default_db_stats")]
    pub db_stats: String,
    #[serde(rename = "DBTasksDoneTrace", default = "default_db_tasks_done_trace")]
    pub db_tasks_done_trace: String,
    #[serde(rename = "DBTasksInTrace", default = "default_db_tasks_in_trace")]
    pub db_tasks_in_trace: String,
    #[serde(rename = "ClusterSetup", default = "default_cluster_setup")]
    pub cluster_setup: String,
    /// Elasticity policy name; empty disables autoscaling.
    #[serde(rename = "Autoscaler", default = "default_autoscaler")]
    pub autoscaler: String,
    /// Allocation policy name.
    #[serde(rename = "Scheduler", default = "default_scheduler")]
    pub scheduler: String,
    /// Workload override: a .gwf file or a directory of .gwf files.
    /// Takes precedence over the Gwf column of the cluster setup.
    #[serde(rename = "GWF", default, skip_serializing_if = "Option::is_none")]
    pub gwf: Option<String>,
    /// Use only the first N clusters of the cluster setup.
    #[serde(rename = "N_CLUSTERS", default, skip_serializing_if = "Option::is_none")]
    pub n_clusters: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_ticks: 1,
            output_dir: default_output_dir(),
            runtime_output_filename: default_runtime_output_filename(),
            db_log: default_db_log(),
            db_logging_enabled: default_db_logging_enabled(),
            db_stats: default_db_stats(),
            db_tasks_done_trace: default_db_tasks_done_trace(),
            db_tasks_in_trace: default_db_tasks_in_trace(),
            cluster_setup: default_cluster_setup(),
            autoscaler: default_autoscaler(),
            scheduler: default_scheduler(),
            gwf: None,
            n_clusters: None,
        }
    }
}

/// `[central_queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentralQueueConfig {
    #[serde(
        rename = "N_TICKS_MONITOR_SITE_STATUS",
        default = "default_n_ticks_monitor_site_status"
    )]
    pub n_ticks_monitor_site_status: u64,
    #[serde(
        rename = "USER_METRICS_FILENAME",
        default = "default_user_metrics_filename"
    )]
    pub user_metrics_filename: String,
}

impl Default for CentralQueueConfig {
    fn default() -> Self {
        Self {
            n_ticks_monitor_site_status: default_n_ticks_monitor_site_status(),
            user_metrics_filename: default_user_metrics_filename(),
        }
    }
}

/// `[autoscaler]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalerConfig {
    #[serde(rename = "OPS_FILENAME", default = "default_ops_filename")]
    pub ops_filename: String,
    #[serde(
        rename = "ELASTICITY_METRICS_FILENAME",
        default = "default_elasticity_metrics_filename"
    )]
    pub elasticity_metrics_filename: String,
    #[serde(rename = "COST_METRICS_FILENAME", default = "default_cost_metrics_filename")]
    pub cost_metrics_filename: String,
    #[serde(
        rename = "ELASTICITY_OVERVIEW_FILENAME",
        default = "default_elasticity_overview_filename"
    )]
    pub elasticity_overview_filename: String,
    #[serde(rename = "N_TICKS_PER_EVALUATE", default = "default_n_ticks_per_evaluate")]
    pub n_ticks_per_evaluate: u64,
    #[serde(rename = "HIST_PERCENTILE", default = "default_hist_percentile")]
    pub hist_percentile: f64,
    #[serde(rename = "TOKEN_TIME_THRESHOLD", default = "default_token_time_threshold")]
    pub token_time_threshold: u64,
    #[serde(rename = "TOKEN_MAX_CAPACITY", default = "default_token_max_capacity")]
    pub token_max_capacity: u64,
    #[serde(rename = "SERVER_SPEED", default = "default_server_speed")]
    pub server_speed: f64,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            ops_filename: default_ops_filename(),
            elasticity_metrics_filename: default_elasticity_metrics_filename(),
            cost_metrics_filename: default_cost_metrics_filename(),
            elasticity_overview_filename: default_elasticity_overview_filename(),
            n_ticks_per_evaluate: default_n_ticks_per_evaluate(),
            hist_percentile: default_hist_percentile(),
            token_time_threshold: default_token_time_threshold(),
            token_max_capacity: default_token_max_capacity(),
            server_speed: default_server_speed(),
        }
    }
}

/// `[site_monitor]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteMonitorConfig {
    #[serde(
        rename = "N_TICKS_BETWEEN_MONITORING",
        default = "default_n_ticks_between_monitoring"
    )]
    pub n_ticks_between_monitoring: u64,
    #[serde(rename = "AMOUNT_OF_DAYS_HISTORY", default = "default_amount_of_days_history")]
    pub amount_of_days_history: u64,
    #[serde(
        rename = "AMOUNT_OF_MINUTES_TO_TRACK",
        default = "default_amount_of_minutes_to_track"
    )]
    pub amount_of_minutes_to_track: u64,
}

impl Default for SiteMonitorConfig {
    fn default() -> Self {
        Self {
            n_ticks_between_monitoring: default_n_ticks_between_monitoring(),
            amount_of_days_history: default_amount_of_days_history(),
            amount_of_minutes_to_track: default_amount_of_minutes_to_track(),
        }
    }
}

/// `[system_monitor]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMonitorConfig {
    #[serde(
        rename = "N_TICKS_UPDATE_STATISTICS",
        default = "default_n_ticks_update_statistics"
    )]
    pub n_ticks_update_statistics: u64,
}

impl Default for SystemMonitorConfig {
    fn default() -> Self {
        Self {
            n_ticks_update_statistics: default_n_ticks_update_statistics(),
        }
    }
}

impl SimConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SimulatorError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;

        let config: SimConfig = toml::from_str(&content)
            .map_err(|e| SimulatorError::Config(format!("malformed config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from the command-line shortcut form
    /// (`N_TICKS --GWF=... [--N=...]`), with all other keys defaulted.
    pub fn generate(n_ticks: u64, gwf: Option<String>, n_clusters: Option<usize>) -> Result<Self> {
        let config = SimConfig {
            simulation: SimulationConfig {
                n_ticks,
                gwf,
                n_clusters,
                ..SimulationConfig::default()
            },
            ..SimConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the simulator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.simulation.n_ticks == 0 {
            return Err(
                SimulatorError::Config("simulation.N_TICKS must be a positive integer".into())
                    .into(),
            );
        }

        if !SCHEDULER_NAMES.contains(&self.simulation.scheduler.as_str()) {
            return Err(SimulatorError::Config(format!(
                "unknown scheduler '{}', expected one of {:?}",
                self.simulation.scheduler, SCHEDULER_NAMES
            ))
            .into());
        }

        if !AUTOSCALER_NAMES.contains(&self.simulation.autoscaler.as_str()) {
            return Err(SimulatorError::Config(format!(
                "unknown autoscaler '{}', expected one of {:?}",
                self.simulation.autoscaler, AUTOSCALER_NAMES
            ))
            .into());
        }

        if let Some(n) = self.simulation.n_clusters {
            if n == 0 {
                return Err(
                    SimulatorError::Config("simulation.N_CLUSTERS must be positive".into()).into(),
                );
            }
        }

        Ok(())
    }

    /// Output directory for this run: `OUTPUT_DIR/ID/ITERATION`, created
    /// on demand.
    pub fn output_dir(&self) -> Result<PathBuf> {
        let mut dir = PathBuf::from(&self.simulation.output_dir);
        if !self.experiment.id.is_empty() {
            dir.push(&self.experiment.id);
        }
        if !self.experiment.iteration.is_empty() {
            dir.push(&self.experiment.iteration);
        }

        fs::create_dir_all(&dir).map_err(|e| {
            SimulatorError::Config(format!(
                "cannot create output directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(dir)
    }

    /// Saves the effective configuration into the output directory.
    pub fn save(&self, output_dir: &Path) -> Result<()> {
        let serialized = toml::to_string_pretty(self)
            .map_err(|e| SimulatorError::Config(format!("cannot serialize config: {}", e)))?;
        let path = output_dir.join("config.toml");
        fs::write(&path, serialized).map_err(|e| {
            SimulatorError::Config(format!("cannot write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}
