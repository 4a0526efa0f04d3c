//! Shared data structures and utilities for the meta-scheduling simulator
//!
//! This crate contains the configuration model, the workload and cluster
//! descriptor file readers, and generic helpers used by the simulator binary.

pub mod config;
pub mod defaults;
pub mod gwf;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::SimConfig;
pub use gwf::{ClusterInfo, GwfRow};
pub use utils::{subset_closest_to_sum, subset_closest_to_sum2};

/// Result type alias used throughout the simulator crates
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the simulator
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workload error: {0}")]
    Workload(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Database error: {0}")]
    Database(String),
}

#[cfg(test)]
mod tests;
