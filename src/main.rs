//! Command-line driver for the UAVNet simulator.
//!
//! Loads the TOML configuration (every field optional), applies the CLI
//! overrides, runs the simulation to its horizon, and writes
//! `simulation_result.txt` into the output directory. Exit code is
//! non-zero on configuration or I/O errors.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use uavnet_simulator::config::{Scene, SimulationConfig};
use uavnet_simulator::simulator::Simulator;

#[derive(Parser)]
#[command(
    name = "uavnet-simulator",
    about = "Discrete-event simulator for UAV ad-hoc networks",
    version
)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON scene file with explicit node positions.
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Override the random seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the fleet size.
    #[arg(long)]
    drones: Option<usize>,

    /// Override the simulated time, microseconds.
    #[arg(long)]
    sim_time: Option<u64>,

    /// Override the output directory.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SimulationConfig::load(path).map_err(anyhow::Error::msg)?,
        None => SimulationConfig::default(),
    };
    if let Some(scene_path) = &cli.scene {
        let scene = Scene::load(scene_path).map_err(anyhow::Error::msg)?;
        config.number_of_drones = scene.nodes.len();
        config.initial_positions = Some(
            scene
                .nodes
                .iter()
                .map(|node| [node.position.x, node.position.y, node.position.z])
                .collect(),
        );
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(drones) = cli.drones {
        config.number_of_drones = drones;
    }
    if let Some(sim_time) = cli.sim_time {
        config.sim_time = sim_time;
    }
    if let Some(output) = cli.output {
        config.output_path = output;
    }

    let mut simulator = Simulator::new(config).context("simulator bootstrap failed")?;
    simulator.run();
    simulator
        .write_results()
        .context("writing simulation results failed")?;
    Ok(())
}
