//! canwatch CLI entry point.
//!
//! Provides `start`, `check`, `faults`, and `simulate` subcommands for
//! running the monitor, validating configuration, dumping the fault ledger,
//! and producing a simulated signal log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use canwatch::catalog::SignalCatalog;
use canwatch::config::MonitorConfig;
use canwatch::engine::Engine;
use canwatch::ledger::{self, LedgerError};
use canwatch::logging;
use canwatch::simulator::Simulator;
use canwatch::tailer::LogTailer;

/// Vehicle-bus signal log monitor.
#[derive(Parser)]
#[command(name = "canwatch", version, about)]
struct Cli {
    /// Config file (default: `$CANWATCH_CONFIG` or `./canwatch.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Follow the signal log and record faults until interrupted.
    Start {
        /// Overrides shared with the other subcommands.
        #[command(flatten)]
        paths: PathArgs,
        /// Max silence in seconds for signals without their own setting.
        #[arg(long)]
        timeout: Option<f64>,
        /// Seconds between diagnostic summaries.
        #[arg(long)]
        summary_interval: Option<u64>,
    },
    /// Validate configuration, print the catalog, and exit.
    Check {
        /// Path overrides.
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Print the fault ledger as JSON.
    Faults {
        /// Path overrides.
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Append simulated readings to the signal log.
    Simulate {
        /// Path overrides.
        #[command(flatten)]
        paths: PathArgs,
        /// Milliseconds between cycles.
        #[arg(long)]
        cadence_millis: Option<u64>,
        /// Stop after this many cycles.
        #[arg(long)]
        count: Option<u64>,
        /// Chance (0.0 - 1.0) of an out-of-range value.
        #[arg(long)]
        out_of_range_probability: Option<f64>,
        /// Signal id to keep silent; repeatable.
        #[arg(long = "silent")]
        silent: Vec<String>,
        /// Seed for reproducible values.
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Log and ledger path overrides.
#[derive(Args)]
struct PathArgs {
    /// Signal log to read (or write, for `simulate`).
    #[arg(long)]
    logfile: Option<PathBuf>,
    /// Fault ledger to write (or read, for `faults`).
    #[arg(long)]
    faultlog: Option<PathBuf>,
}

impl PathArgs {
    fn apply(self, config: &mut MonitorConfig) {
        if let Some(path) = self.logfile {
            config.paths.log_file = path;
        }
        if let Some(path) = self.faultlog {
            config.paths.ledger_file = path;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = MonitorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Start {
            paths,
            timeout,
            summary_interval,
        } => {
            paths.apply(&mut config);
            if let Some(secs) = timeout {
                config.engine.default_timeout_secs = secs;
            }
            if let Some(secs) = summary_interval {
                config.engine.summary_interval_secs = secs;
            }
            handle_start(config).await
        }
        Command::Check { paths } => {
            paths.apply(&mut config);
            handle_check(&config)
        }
        Command::Faults { paths } => {
            paths.apply(&mut config);
            handle_faults(&config)
        }
        Command::Simulate {
            paths,
            cadence_millis,
            count,
            out_of_range_probability,
            silent,
            seed,
        } => {
            paths.apply(&mut config);
            if let Some(millis) = cadence_millis {
                config.simulator.cadence_millis = millis;
            }
            if let Some(probability) = out_of_range_probability {
                config.simulator.out_of_range_probability = probability;
            }
            if !silent.is_empty() {
                config.simulator.silent_signals = silent;
            }
            handle_simulate(config, count, seed).await
        }
    }
}

/// Run the monitor until Ctrl-C or a fatal ledger error.
async fn handle_start(config: MonitorConfig) -> anyhow::Result<()> {
    config.validate()?;
    let _logging_guard = logging::init_production(&config.paths.logs_dir)?;

    info!(
        log = %config.paths.log_file.display(),
        ledger = %config.paths.ledger_file.display(),
        timeout_secs = config.engine.default_timeout_secs,
        summary_interval_secs = config.engine.summary_interval_secs,
        "configuration loaded"
    );

    let engine = Engine::from_config(&config, chrono::Utc::now())?;
    let tailer = LogTailer::new(config.paths.log_file.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    let stats = engine
        .run(tailer, shutdown_rx)
        .await
        .context("monitoring stopped on a ledger failure")?;

    info!(
        rows = stats.rows,
        faults = stats.faults,
        malformed = stats.malformed,
        unknown = stats.unknown,
        rotations = stats.rotations,
        summaries = stats.summaries,
        "run complete"
    );
    Ok(())
}

/// Validate configuration and report what a run would use.
fn handle_check(config: &MonitorConfig) -> anyhow::Result<()> {
    logging::init_cli();
    config.validate()?;
    let catalog = SignalCatalog::from_config(config)?;

    println!("Signals:");
    for spec in catalog.iter() {
        println!(
            "  {id:<8} {name:<10} [{min}, {max}] {unit:<6} max silence {silence:.1}s{dtc}",
            id = spec.id,
            name = spec.name,
            min = spec.min,
            max = spec.max,
            unit = spec.unit,
            silence = spec.max_silence.as_secs_f64(),
            dtc = spec
                .dtc
                .as_deref()
                .map(|dtc| format!(" DTC {dtc}"))
                .unwrap_or_default(),
        );
    }
    for (label, path) in [
        ("Log", &config.paths.log_file),
        ("Ledger", &config.paths.ledger_file),
    ] {
        let state = if path.exists() { "present" } else { "missing" };
        println!("{label}: {} ({state})", path.display());
    }
    info!(signals = catalog.len(), "configuration valid");
    Ok(())
}

/// Print the ledger contents as a JSON array.
fn handle_faults(config: &MonitorConfig) -> anyhow::Result<()> {
    logging::init_cli();
    let entries = match ledger::read_ledger(&config.paths.ledger_file) {
        Ok(entries) => entries,
        Err(e @ LedgerError::NotFound { .. }) => return Err(e.into()),
        Err(e) => return Err(e).context("failed to read fault ledger"),
    };
    let json = serde_json::to_string_pretty(&entries).context("failed to serialize faults")?;
    println!("{json}");
    Ok(())
}

/// Write simulated rows until Ctrl-C or `count` cycles.
async fn handle_simulate(
    config: MonitorConfig,
    count: Option<u64>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    logging::init_cli();
    config.validate()?;
    let catalog = SignalCatalog::from_config(&config)?;
    let mut simulator =
        Simulator::create(&config.paths.log_file, &catalog, &config.simulator, seed)?;

    info!(
        log = %simulator.path().display(),
        cadence_ms = config.simulator.cadence_millis,
        "simulator started"
    );

    let mut interval =
        tokio::time::interval(Duration::from_millis(config.simulator.cadence_millis));
    let mut cycles: u64 = 0;
    loop {
        if count.is_some_and(|limit| cycles >= limit) {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                for row in simulator.write_cycle(chrono::Utc::now())? {
                    info!(signal = %row.signal, value = row.value, unit = %row.unit, "sent");
                }
                cycles = cycles.saturating_add(1);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    info!(cycles, "simulator stopped");
    Ok(())
}
