//! Headless foraging runs from the command line.

use anyhow::{Context, Result};
use cachebots_sim::{SimConfig, Simulation};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cachebots", version, about = "Swarm foraging simulation driver")]
struct Cli {
    /// Simulation length in ticks (default 10000).
    #[arg(long)]
    ticks: Option<u64>,
    /// Generalist robots to spawn (default 8).
    #[arg(long)]
    generalists: Option<u32>,
    /// Harvester robots to spawn (default 4).
    #[arg(long)]
    harvesters: Option<u32>,
    /// Collector robots to spawn (default 4).
    #[arg(long)]
    collectors: Option<u32>,
    /// Master seed; one seed fixes the whole run.
    #[arg(long)]
    seed: Option<u64>,
    /// Directory for metric CSVs; nothing is written without it.
    #[arg(long)]
    metrics_dir: Option<PathBuf>,
    /// Ticks per metric flush window (default 1000).
    #[arg(long)]
    metrics_interval: Option<u64>,
    /// JSON configuration file; command line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn load_config(cli: &Cli) -> Result<SimConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(ticks) = cli.ticks {
        config.ticks = ticks;
    }
    if let Some(count) = cli.generalists {
        config.task_mix.generalists = count;
    }
    if let Some(count) = cli.harvesters {
        config.task_mix.harvesters = count;
    }
    if let Some(count) = cli.collectors {
        config.task_mix.collectors = count;
    }
    if let Some(interval) = cli.metrics_interval {
        config.metrics_interval = interval;
    }
    if cli.metrics_dir.is_some() {
        config.metrics_path = cli.metrics_dir.clone();
    }
    if let Some(seed) = cli.seed {
        config.set_master_seed(seed);
    }
    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let mut sim = Simulation::new(config).context("bootstrapping the simulation")?;
    sim.run().context("running the simulation")?;

    let distance: f64 = sim.robots().iter().map(|r| r.controller().distance()).sum();
    let aborts: u64 = sim.robots().iter().map(|r| r.controller().aborts()).sum();
    info!(
        ticks = sim.clock().0,
        collected = sim.arena().collected_blocks(),
        caches = sim.arena().cache_count(),
        aborts,
        distance,
        "run finished"
    );
    sim.write_metrics().context("writing metric CSVs")?;
    Ok(())
}
