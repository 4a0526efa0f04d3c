//! Meta-scheduling simulator
//!
//! Simulates a federated compute system: users submit workflows of
//! dependent tasks to a central queue, an allocation policy dispatches
//! ready tasks onto sites, and an optional elasticity policy grows or
//! shrinks the set of running sites. Virtual time advances through an
//! event priority queue; every run leaves its configuration, trace
//! databases and metric logs in the output directory.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use shared::config::SimConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

mod autoscaler;
mod central_queue;
mod database;
mod kernel;
mod monitors;
mod resource_manager;
mod scheduler;
mod sim;
mod site;
mod stats;
mod task;
mod workflow;
mod workload;

use sim::SystemSim;

/// Command-line arguments for the simulator
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Discrete-event simulator of an elastic meta-scheduling plane", long_about = None)]
struct CliArgs {
    /// Path to a TOML configuration file, or a bare N_TICKS horizon
    /// (requires --GWF)
    #[arg(value_name = "CONFIG_OR_N_TICKS")]
    target: Option<String>,

    /// Workload: a .gwf file or a directory of .gwf files. Only valid
    /// together with a bare N_TICKS horizon
    #[arg(long = "GWF", value_name = "FILE_OR_DIR")]
    gwf: Option<PathBuf>,

    /// Apply the workload to the first N clusters of the cluster setup
    #[arg(long = "N", value_name = "CLUSTERS")]
    n_clusters: Option<usize>,

    /// Silence simulator output on stdout
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Enable simulator debug logging on stdout
    #[arg(short, long)]
    verbose: bool,

    /// Save simulator runtime output to this file (inside the output
    /// directory)
    #[arg(short, value_name = "FILE")]
    output: Option<String>,
}

impl CliArgs {
    /// Resolves the positional argument: a number is a horizon with a
    /// generated config, anything else is a config file path.
    fn build_config(&self) -> Result<SimConfig> {
        match &self.target {
            Some(target) => match target.parse::<u64>() {
                Ok(n_ticks) => {
                    let gwf = self
                        .gwf
                        .as_ref()
                        .context("--GWF is required when passing a bare N_TICKS horizon")?;
                    SimConfig::generate(
                        n_ticks,
                        Some(gwf.to_string_lossy().into_owned()),
                        self.n_clusters,
                    )
                }
                Err(_) => SimConfig::load(std::path::Path::new(target)),
            },
            None => SimConfig::load(std::path::Path::new("default_config.toml")),
        }
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let mut config = cli_args.build_config()?;
    if let Some(output) = &cli_args.output {
        config.simulation.runtime_output_filename = output.clone();
    }

    // The runtime log lands in the output directory next to the trace
    // databases; stdout verbosity is CLI-controlled.
    let output_dir = config.output_dir()?;
    let runtime_log = std::fs::File::create(output_dir.join(&config.simulation.runtime_output_filename))
        .context("cannot create runtime output file")?;
    let (file_writer, _guard) = tracing_appender::non_blocking(runtime_log);

    let stdout_level = if cli_args.quiet {
        tracing_subscriber::filter::LevelFilter::OFF
    } else if cli_args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(stdout_level),
        )
        .init();

    info!("meta-scheduling simulator starting up");

    let mut system_sim = SystemSim::new(config)?;
    system_sim.run()?;

    Ok(())
}

// Unit tests for the simulator crate.
#[cfg(test)]
mod tests;
