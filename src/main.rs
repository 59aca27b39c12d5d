// src/main.rs - CLI entry point: `prepare`, `solve`, `worker` subcommands.

use anyhow::Context;
use clap::{Parser, Subcommand};
use foodset::catalog::load_catalog;
use foodset::config::RunConfig;
use foodset::orchestrator::Orchestrator;
use foodset::store::Store;
use foodset::worker::run_worker;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foodset", about = "Nutrient-constrained food-set enumerator")]
struct Cli {
    /// Increase log verbosity (-v, -vv). Overridden by RUST_LOG if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the catalog without touching the Store; reports
    /// catalog size and nutrient count.
    Prepare {
        #[arg(long)]
        requirements: PathBuf,
        #[arg(long)]
        foods: PathBuf,
        #[arg(long)]
        cardinality: usize,
    },
    /// Run a full solve: initializes the Store, spawns the worker pool,
    /// and blocks until the queue is drained.
    Solve {
        #[arg(long)]
        requirements: PathBuf,
        #[arg(long)]
        foods: PathBuf,
        #[arg(long)]
        cardinality: usize,
        #[arg(long)]
        store: PathBuf,
        /// Worker process count; defaults to the logical core count.
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value_t = 3600)]
        job_timeout_secs: u64,
        /// Optional TOML overlay applied on top of the defaults above.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Before dispatching, clear any `in_progress` rows left behind by a
        /// prior run that was interrupted (`Ctrl-C`) or crashed, re-queueing
        /// them as pending. Only safe when no other process still holds
        /// those claims.
        #[arg(long)]
        resume: bool,
    },
    /// Internal: runs one worker's claim/solve/complete loop. Normally
    /// spawned only by the `solve` orchestrator, never invoked directly.
    Worker {
        #[arg(long)]
        requirements: PathBuf,
        #[arg(long)]
        foods: PathBuf,
        #[arg(long)]
        cardinality: usize,
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        worker_id: String,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("foodset={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli.command).await {
        tracing::error!(error = format!("{e:#}"), "fatal error");
        std::process::exit(1);
    }
}

/// The CLI boundary: every subcommand's domain `FoodSetError` is wrapped in
/// `anyhow` here so the exit path can attach flag-level context without the
/// library's own error enum needing to know about CLI concerns.
async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Prepare {
            requirements,
            foods,
            cardinality,
        } => {
            let catalog = load_catalog(&requirements, &foods)
                .with_context(|| format!("loading catalog from {}", foods.display()))?;
            let config = RunConfig::new(cardinality, "unused", &requirements, &foods);
            config.validate(catalog.foods().len())?;
            tracing::info!(
                foods = catalog.foods().len(),
                nutrients = catalog.nutrient_count(),
                cardinality,
                "catalog is valid"
            );
            Ok(())
        }
        Command::Solve {
            requirements,
            foods,
            cardinality,
            store,
            workers,
            job_timeout_secs,
            config,
            resume,
        } => {
            let catalog = load_catalog(&requirements, &foods)
                .with_context(|| format!("loading catalog from {}", foods.display()))?;
            let mut run_config = RunConfig::new(cardinality, store, requirements, foods);
            run_config.job_timeout_secs = job_timeout_secs;
            if let Some(w) = workers {
                run_config.worker_count = w;
            }
            if let Some(path) = config {
                run_config
                    .apply_overlay_file(&path)
                    .with_context(|| format!("applying run config overlay {}", path.display()))?;
            }
            run_config.validate(catalog.foods().len())?;

            let store = Store::connect(&run_config.store_path)
                .await
                .context("connecting to store")?;
            let mut orchestrator = Orchestrator::new(store, run_config);
            if resume {
                orchestrator.resume().await.context("resuming prior run")?;
            }
            orchestrator.run().await.context("solve run")?;
            Ok(())
        }
        Command::Worker {
            requirements,
            foods,
            cardinality,
            store,
            worker_id,
        } => {
            let run_config = RunConfig::new(cardinality, store, requirements, foods);
            run_worker(&run_config, &worker_id)
                .await
                .with_context(|| format!("worker {worker_id} run"))?;
            Ok(())
        }
    }
}
