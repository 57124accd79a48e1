//! Wattson CLI
//!
//! Runs monitoring cycles against a simulated Dubai building fleet.
//!
//! # Usage
//! ```bash
//! wattson run [--config wattson.toml] [--cycles 3] [--units 16] [--seed 7] [--json] [--verbose]
//! wattson config > wattson.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use wattson_core::knowledge::InMemoryKnowledgeStore;
use wattson_core::{CycleOrchestrator, EngineConfig, Services};

mod demo;
mod render;

/// Wattson - detect, diagnose and act on building energy anomalies
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run monitoring cycles over a simulated fleet
    Run {
        /// Engine configuration (TOML); defaults apply to missing keys
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of cycles to run
        #[arg(long, default_value = "3")]
        cycles: u32,

        /// Number of simulated units
        #[arg(long, default_value = "16")]
        units: usize,

        /// Seed for the simulated fleet
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Seconds between cycles
        #[arg(long, default_value = "5")]
        interval: u64,

        /// Override the monitoring window (seconds)
        #[arg(long, value_name = "SECS")]
        window: Option<u64>,

        /// Override the monitoring poll interval (seconds)
        #[arg(long, value_name = "SECS")]
        poll: Option<u64>,

        /// Persist the knowledge store to this JSON file
        #[arg(long, value_name = "FILE")]
        knowledge: Option<PathBuf>,

        /// Print cycle reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Config => {
            print!("{}", EngineConfig::default().to_toml_string()?);
        }
        Commands::Run {
            config,
            cycles,
            units,
            seed,
            interval,
            window,
            poll,
            knowledge,
            json,
        } => {
            let mut engine = match &config {
                Some(path) => EngineConfig::from_file(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => EngineConfig::default(),
            };
            if let Some(secs) = window {
                engine.execution.monitoring_window_secs = secs;
            }
            if let Some(secs) = poll {
                engine.execution.poll_interval_secs = secs;
            }

            let run = RunOptions {
                cycles,
                units,
                seed,
                interval: Duration::from_secs(interval),
                knowledge,
                json,
            };
            run_cycles(engine, run).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr so `--json` output stays parseable; `RUST_LOG`
/// overrides the level
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_thread_ids(verbose)
        .init();
}

struct RunOptions {
    cycles: u32,
    units: usize,
    seed: u64,
    interval: Duration,
    knowledge: Option<PathBuf>,
    json: bool,
}

async fn run_cycles(config: EngineConfig, options: RunOptions) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;

    let store = match &options.knowledge {
        Some(path) => InMemoryKnowledgeStore::with_storage(path)
            .await
            .with_context(|| format!("Failed to open knowledge store {}", path.display()))?,
        None => InMemoryKnowledgeStore::new(),
    };
    demo::seed_knowledge(&store, &config.catalog).await?;

    let fleet = demo::DemoFleet::new(options.units, options.seed);
    let services = Services {
        telemetry: fleet.clone(),
        weather: fleet.clone(),
        explainer: fleet.clone(),
        knowledge: Arc::new(store),
        simulator: fleet.clone(),
        channel: fleet.clone(),
    };
    let orchestrator = CycleOrchestrator::new(config, services)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the current cycle");
            on_signal.cancel();
        }
    });

    tracing::info!(
        units = options.units,
        seed = options.seed,
        cycles = options.cycles,
        "Starting Wattson"
    );

    for number in 1..=options.cycles {
        let report = orchestrator.run_cycle(fleet.units(), &cancel).await;
        if options.json {
            println!("{}", report.to_json()?);
        } else {
            render::print_report(number, &report);
        }

        if cancel.is_cancelled() {
            break;
        }
        if number < options.cycles {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(options.interval) => {}
            }
        }
    }

    let pending = orchestrator.tracked_monitors().await;
    if pending > 0 {
        tracing::info!(
            executions = pending,
            window_secs = orchestrator.config().execution.monitoring_window_secs,
            "Waiting for monitoring windows to close"
        );
    }
    let records = orchestrator.settle().await;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        render::print_records(&records);
    }

    let flagged = orchestrator.ledger().flagged_for_manual_intervention();
    if !flagged.is_empty() {
        tracing::error!(
            records = flagged.len(),
            "Executions need manual intervention before the next run"
        );
    }

    Ok(())
}
