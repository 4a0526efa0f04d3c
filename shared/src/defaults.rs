//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain
//! optional fields.

// Experiment defaults

/// Default experiment identifier (empty, output lands directly in OUTPUT_DIR)
pub fn default_experiment_id() -> String {
    String::new()
}

/// Default experiment iteration (empty)
pub fn default_experiment_iteration() -> String {
    String::new()
}

// Simulation defaults

/// Default output directory for all run artifacts
pub fn default_output_dir() -> String {
    "output".to_string()
}

/// Default filename for the runtime log inside the output directory
pub fn default_runtime_output_filename() -> String {
    "runtime.out".to_string()
}

/// Default filename for the message-log database
pub fn default_db_log() -> String {
    "log.db3".to_string()
}

/// Database message logging is on unless explicitly disabled
pub fn default_db_logging_enabled() -> bool {
    true
}

/// Default filename for the statistics database
pub fn default_db_stats() -> String {
    "stats.db3".to_string()
}

/// Default filename for the finished-tasks trace database
pub fn default_db_tasks_done_trace() -> String {
    "tasksdone.db3".to_string()
}

/// Default filename for the admitted-tasks trace database
pub fn default_db_tasks_in_trace() -> String {
    "tasksin.db3".to_string()
}

/// Default cluster descriptor file
pub fn default_cluster_setup() -> String {
    "clustersetup.csv".to_string()
}

/// No autoscaler unless one is configured
pub fn default_autoscaler() -> String {
    String::new()
}

/// Default allocation policy
pub fn default_scheduler() -> String {
    "fillworstfit".to_string()
}

// Central queue defaults

/// Default period (ticks) between site status monitoring rounds
pub fn default_n_ticks_monitor_site_status() -> u64 {
    5
}

/// Default filename for the per-workflow user metrics report
pub fn default_user_metrics_filename() -> String {
    "user_metrics.log".to_string()
}

// Autoscaler defaults

/// Default filename for the scaling operations log
pub fn default_ops_filename() -> String {
    "autoscaler.log".to_string()
}

/// Default filename for the elasticity metrics log
pub fn default_elasticity_metrics_filename() -> String {
    "elasticity_metrics.log".to_string()
}

/// Default filename for the cost metrics log
pub fn default_cost_metrics_filename() -> String {
    "cost_metrics.log".to_string()
}

/// Default filename for the elasticity overview log
pub fn default_elasticity_overview_filename() -> String {
    "elasticity_overview.log".to_string()
}

/// Default period (ticks) between autoscaler evaluations
pub fn default_n_ticks_per_evaluate() -> u64 {
    30
}

/// Default percentile used by the hist autoscaler
pub fn default_hist_percentile() -> f64 {
    0.9
}

/// Default time threshold (ticks) for the token autoscaler
pub fn default_token_time_threshold() -> u64 {
    30
}

/// Default cap on the token autoscaler's predicted capacity
pub fn default_token_max_capacity() -> u64 {
    500
}

/// Default processing speed assumed by load-based predictions
pub fn default_server_speed() -> f64 {
    1.0
}

// Site monitor defaults

/// Default period (ticks) between per-site monitoring reports
pub fn default_n_ticks_between_monitoring() -> u64 {
    1
}

/// Default number of days of arrival history kept per site
pub fn default_amount_of_days_history() -> u64 {
    3
}

/// Default width (minutes) of the sliding arrival window per site
pub fn default_amount_of_minutes_to_track() -> u64 {
    5
}

// System monitor defaults

/// Default period (ticks) between aggregate statistics refreshes
pub fn default_n_ticks_update_statistics() -> u64 {
    1
}
