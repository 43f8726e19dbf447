//! CLI entry point for hplc_interface.
//!
//! Finds the gradient controller and UV detector bridge, verifies the
//! experiment configuration against them, and samples the gradient until
//! Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! hplc_interface                         # ~/Desktop/config.yaml, auto-discovery
//! hplc_interface --port /dev/ttyACM0 --port /dev/ttyACM1 --record run.csv
//! hplc_interface --mock --experiment demo.yaml
//! hplc_interface --list-ports
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use hplc_interface::logging::{self, LogConfig, OutputFormat};
use hplc_interface::{mock, serial, ExperimentConfig, HplcInterface, Settings};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hplc_interface", version)]
#[command(about = "Control an HPLC rig of modular devices", long_about = None)]
struct Cli {
    /// Runtime settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Experiment file (YAML); defaults to <base_path>/config.yaml
    #[arg(long)]
    experiment: Option<PathBuf>,

    /// Serial port to probe; repeat for several. Default: all USB ports
    #[arg(long = "port")]
    ports: Vec<String>,

    /// Append every gradient sample to this CSV file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Debug logging and setup timing
    #[arg(long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    /// Run against simulated devices
    #[arg(long)]
    mock: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_ports {
        return list_ports();
    }

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    settings.debug |= cli.debug;
    if !cli.ports.is_empty() {
        settings.ports = cli.ports;
    }
    if cli.record.is_some() {
        settings.record_path = cli.record;
    }
    if let Some(experiment) = &cli.experiment {
        if let Some(dir) = experiment.parent() {
            settings.base_path = dir.to_path_buf();
        }
        if let Some(name) = experiment.file_name() {
            settings.config_filename = name.to_string_lossy().into_owned();
        }
    }

    logging::init(LogConfig::from_settings(&settings)?.with_format(cli.log_format))?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hplc_interface starting");

    let mut hplc = if cli.mock {
        let experiment = ExperimentConfig::load(&settings.experiment_config_path())?;
        let clients = mock::mock_clients(&settings, &experiment).await?;
        tracing::warn!("Using simulated devices");
        HplcInterface::with_clients(settings, clients).with_experiment(experiment)
    } else {
        HplcInterface::with_settings(settings)
    };

    hplc.start().await.context("Failed to start HPLC interface")?;
    tracing::info!("Running - press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Interrupted, stopping");
    hplc.stop().await.context("Failed to stop HPLC controller")?;
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = serial::describe_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports detected on this system.");
        return Ok(());
    }
    for (name, description) in ports {
        println!("{:<24} {}", name, description);
    }
    Ok(())
}
