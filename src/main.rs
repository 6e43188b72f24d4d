//! CLI Entry Point for probe-daq
//!
//! Provides command-line interface for:
//! - Running one acquisition against the probe and writing its report
//! - An interactive terminal for manual probe commands (laser, servo)
//! - Replaying a recorded capture offline
//!
//! # Usage
//!
//! Acquire and write a survey report:
//! ```bash
//! probe-daq acquire --workflow survey --port /dev/rfcomm0
//! ```
//!
//! Record a reference acquisition for calibration:
//! ```bash
//! probe-daq acquire --workflow reference
//! ```
//!
//! Re-run the pipeline over a capture:
//! ```bash
//! probe-daq replay capture.txt --workflow calibrated
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use probe_daq::acquisition::{spawn_session, ProbeCommand, SessionEvent};
use probe_daq::config::ProbeConfig;
use probe_daq::logging;
use probe_daq::measurement::{MeasurementOutcome, MeasurementRunner, MeasurementWorkflow};
use probe_daq::transport::DynSerial;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

#[derive(Parser)]
#[command(name = "probe-daq")]
#[command(about = "Five-channel probe acquisition and analysis", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/probe.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition and process it
    Acquire {
        /// What to produce from the acquisition
        #[arg(long, value_enum, default_value_t = MeasurementWorkflow::Survey)]
        workflow: MeasurementWorkflow,

        /// Serial port (overrides transport.port)
        #[arg(long)]
        port: Option<String>,
    },

    /// Send commands typed on stdin and print all traffic
    Terminal {
        /// Serial port (overrides transport.port)
        #[arg(long)]
        port: Option<String>,
    },

    /// Process a recorded capture of probe output
    Replay {
        /// File holding the raw bytes received from the probe
        capture: PathBuf,

        /// What to produce from the acquisition
        #[arg(long, value_enum, default_value_t = MeasurementWorkflow::Survey)]
        workflow: MeasurementWorkflow,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    logging::init_from_config(&config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Acquire { workflow, port } => acquire(&config, workflow, port).await,
        Commands::Terminal { port } => terminal(&config, port).await,
        Commands::Replay { capture, workflow } => replay(&config, &capture, workflow),
    }
}

fn load_config(path: Option<&Path>) -> Result<ProbeConfig> {
    let config = match path {
        Some(path) => ProbeConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProbeConfig::load().context("Failed to load configuration")?,
    };
    config.validate()?;
    Ok(config)
}

async fn open_port(config: &ProbeConfig, port: Option<String>) -> Result<DynSerial> {
    let path = port
        .or_else(|| config.transport.port.clone())
        .context("No serial port given; pass --port or set transport.port")?;

    #[cfg(feature = "serial")]
    {
        let stream = probe_daq::transport::open_serial_async(&path, config.transport.baud_rate)
            .await
            .with_context(|| format!("Failed to open {path}"))?;
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "serial"))]
    {
        bail!("Cannot open {path}: built without the `serial` feature")
    }
}

async fn acquire(
    config: &ProbeConfig,
    workflow: MeasurementWorkflow,
    port: Option<String>,
) -> Result<()> {
    let port = open_port(config, port).await?;
    let (handle, mut events) = spawn_session(port, &config.transport);
    let runner = MeasurementRunner::from_config(config);

    handle.send_command(ProbeCommand::Start).await?;
    println!("Acquiring ({workflow})...");

    let waited = tokio::time::timeout(config.measurement.timeout(), async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Rejected(err) = &event {
                eprintln!("{err}");
            }
            if let Some(outcome) = runner.on_event(workflow, event) {
                return Some(outcome);
            }
        }
        None
    })
    .await;

    let _ = handle.shutdown().await;

    let outcome = match waited {
        Ok(Some(outcome)) => outcome,
        Ok(None) => bail!("Session ended before the acquisition completed"),
        Err(_) => bail!(
            "No `end` from the probe within {}s",
            config.measurement.timeout_secs
        ),
    };
    report(outcome)
}

async fn terminal(config: &ProbeConfig, port: Option<String>) -> Result<()> {
    let port = open_port(config, port).await?;
    let (handle, mut events) = spawn_session(port, &config.transport);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(text) = line? else { break };
                if text.trim().is_empty() {
                    continue;
                }
                let command = match text.parse::<ProbeCommand>() {
                    Ok(command) => command,
                    Err(err) => {
                        eprintln!("{err}");
                        continue;
                    }
                };
                if let Err(err) = handle.send_command(command).await {
                    eprintln!("{err}");
                    if !err.is_recoverable() {
                        break;
                    }
                }
            }
            _ = signal::ctrl_c() => break,
        }
    }

    let _ = handle.shutdown().await;
    let _ = printer.await;
    Ok(())
}

fn replay(config: &ProbeConfig, capture: &Path, workflow: MeasurementWorkflow) -> Result<()> {
    let bytes = std::fs::read(capture)
        .with_context(|| format!("Failed to read capture {}", capture.display()))?;
    let runner = MeasurementRunner::from_config(config);
    report(runner.replay(workflow, &bytes))
}

fn report(outcome: MeasurementOutcome) -> Result<()> {
    match outcome {
        MeasurementOutcome::Failed(err) => Err(err).context("Measurement failed"),
        outcome => {
            println!("{outcome}");
            Ok(())
        }
    }
}
