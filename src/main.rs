//! CLI Entry Point for bench_logger
//!
//! Provides command-line interface for:
//! - Logging a DUT session with marker-triggered instrument polls
//! - Probing the bench instruments without a DUT
//! - Listing serial ports
//!
//! # Usage
//!
//! Log a session:
//! ```bash
//! bench_logger run --port /dev/ttyUSB0 --log-file log/serial_log.txt
//! ```
//!
//! Check the instruments:
//! ```bash
//! bench_logger probe
//! ```

use anyhow::{Context, Result};
use bench_logger::config::{Settings, DEFAULT_CONFIG_PATH};
use bench_logger::session::{self, SessionOutcome, ShutdownSignal};
use bench_logger::{probe, stream, tracing_setup};
use clap::{Args, Parser, Subcommand};
use figment::providers::Serialized;
use figment::Figment;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bench_logger")]
#[command(about = "Marker-triggered DUT serial logger with bench instrument polling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a session until the DUT reports test complete
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Arm the instruments, take one reading and release them
    Probe {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// List serial ports visible to this host
    Ports,
}

/// Command-line settings, highest precedence.
#[derive(Args, Default)]
struct Overrides {
    /// DUT serial port
    #[arg(long)]
    port: Option<String>,

    /// DUT baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Add a timestamp to the log file name
    #[arg(long)]
    timestamped: bool,

    /// Run without the meter
    #[arg(long)]
    no_meter: bool,

    /// Run without the load
    #[arg(long)]
    no_load: bool,
}

impl Overrides {
    fn merge_into(self, mut figment: Figment) -> Figment {
        if let Some(port) = self.port {
            figment = figment.merge(Serialized::default("serial.port", port));
        }
        if let Some(baud) = self.baud {
            figment = figment.merge(Serialized::default("serial.baud_rate", baud));
        }
        if let Some(path) = self.log_file {
            figment = figment.merge(Serialized::default("log.path", path));
        }
        if self.timestamped {
            figment = figment.merge(Serialized::default("log.timestamped", true));
        }
        if self.no_meter {
            figment = figment.merge(Serialized::default("meter.enabled", false));
        }
        if self.no_load {
            figment = figment.merge(Serialized::default("load.enabled", false));
        }
        figment
    }
}

fn load_settings(config: &Path, overrides: Overrides) -> Result<Settings> {
    let figment = overrides.merge_into(Settings::figment(config));
    Settings::from_figment(figment)
        .with_context(|| format!("Failed to load configuration from {}", config.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, overrides } => run_session(config, overrides).await,
        Commands::Probe { config } => run_probe(config).await,
        Commands::Ports => list_ports(),
    }
}

async fn run_session(config: PathBuf, overrides: Overrides) -> Result<()> {
    let settings = load_settings(&config, overrides)?;
    tracing_setup::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    let shutdown = ShutdownSignal::new();
    let listener = shutdown.listen_for_ctrl_c();
    let result = session::run(settings, shutdown).await;
    listener.abort();

    let report = result.context("Session failed")?;
    match report.outcome {
        SessionOutcome::Completed => println!("✅ Test complete"),
        SessionOutcome::Interrupted => println!("⏹️  Interrupted"),
    }
    if let Some(path) = &report.log_path {
        println!(
            "   {} lines, {} correlated records -> {}",
            report.lines,
            report.correlated,
            path.display()
        );
    }
    for step in report.teardown.iter().filter(|s| !s.succeeded()) {
        eprintln!(
            "   teardown '{}' failed: {}",
            step.action,
            step.error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

async fn run_probe(config: PathBuf) -> Result<()> {
    let settings = load_settings(&config, Overrides::default())?;
    tracing_setup::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    let report = probe::probe(&settings).await;
    println!("meter: {}", report.meter);
    println!("load:  {}", report.load);
    println!("meter voltage: {}", report.bundle.meter_voltage);
    println!("meter current: {}", report.bundle.meter_current);
    println!("load current:  {}", report.bundle.load_current);
    println!("load power:    {}", report.bundle.load_power);
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = stream::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for (name, kind) in ports {
        println!("{:<24} {}", name, kind);
    }
    Ok(())
}
