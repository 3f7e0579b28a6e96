//! CLI entry point for the CornerStone130 controller
//!
//! Loads the configuration, opens the instrument, runs one operation and prints the
//! resulting snapshot.
//!
//! # Usage
//!
//! ```bash
//! cs130 status
//! cs130 --config bench.toml wavelength 632.8 --wait
//! cs130 --log-level debug watch --count 10
//! CS130_TRANSPORT__RESOURCE=/dev/ttyUSB1 cs130 shutter open
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use cornerstone130::config::{AppConfig, TransportConfig, TransportKind};
use cornerstone130::logging::{self, OutputFormat, TracingConfig};
use cornerstone130::{DeviceError, DeviceState, Monochromator, OperatingUnit, ShutterState, Transport};

#[derive(Parser)]
#[command(name = "cs130")]
#[command(about = "Control a CornerStone130 monochromator", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = cornerstone130::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShutterArg {
    Open,
    Close,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current snapshot
    Status,

    /// Print the snapshot after every poll
    Watch {
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
        /// Stop after this many samples (runs until Ctrl-C otherwise)
        #[arg(long)]
        count: Option<u64>,
    },

    /// Move to a wavelength in the current operating unit
    Wavelength {
        value: f64,
        /// Wait until the move has settled
        #[arg(long)]
        wait: bool,
    },

    /// Select a grating
    Grating {
        number: u16,
        #[arg(long)]
        wait: bool,
    },

    /// Select a filter wheel position
    Filter {
        number: u16,
        #[arg(long)]
        wait: bool,
    },

    Shutter {
        #[arg(value_enum)]
        state: ShutterArg,
    },

    /// Set the operating unit (NM, UM or WN)
    Units { unit: String },

    /// Stop the current motion
    Abort,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate()?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.application.log_level);
    let tracing_config = TracingConfig::new(logging::parse_log_level(level)?)
        .with_format(cli.log_format.parse::<OutputFormat>()?);
    logging::init(tracing_config)?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        name = %config.application.name,
        transport = %config.transport.kind,
        resource = %config.transport.resource,
        "starting"
    );

    let transport = build_transport(&config.transport)?;
    let device = Monochromator::from_app_config(transport, &config);

    let outcome = run(&device, cli.command).await;
    device.shutdown().await?;
    outcome
}

async fn run(device: &Monochromator, command: Commands) -> Result<()> {
    device.open().await.context("Failed to open the monochromator")?;

    match command {
        Commands::Status | Commands::Config => {
            device.refresh().await?;
        }
        Commands::Watch { interval_ms, count } => {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            let mut samples = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => break,
                }
                device.refresh().await?;
                print_snapshot(device);
                samples += 1;
                if count.is_some_and(|limit| samples >= limit) {
                    break;
                }
            }
            return Ok(());
        }
        Commands::Wavelength { value, wait } => {
            if let Some((min, max)) = device.grating_limits() {
                if !(min..=max).contains(&value) {
                    anyhow::bail!("{value} is outside the current grating range {min}..{max}");
                }
            }
            device.set_wavelength(value).await?;
            if wait {
                wait_until_settled(device).await?;
            }
        }
        Commands::Grating { number, wait } => {
            device.set_grating_number(number).await?;
            if wait {
                wait_until_settled(device).await?;
            }
        }
        Commands::Filter { number, wait } => {
            device.set_filter_number(number).await?;
            if wait {
                wait_until_settled(device).await?;
            }
        }
        Commands::Shutter { state } => {
            let shutter = match state {
                ShutterArg::Open => ShutterState::Open,
                ShutterArg::Close => ShutterState::Closed,
            };
            device.set_shutter_state(shutter).await?;
            device.refresh().await?;
        }
        Commands::Units { unit } => {
            let unit: OperatingUnit = unit.parse()?;
            device.set_unit(unit).await?;
            device.refresh().await?;
        }
        Commands::Abort => {
            device.abort().await?;
            device.refresh().await?;
        }
    }

    print_snapshot(device);
    Ok(())
}

async fn wait_until_settled(device: &Monochromator) -> Result<()> {
    while device.state() == DeviceState::Moving {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    device.refresh().await?;
    Ok(())
}

fn print_snapshot(device: &Monochromator) {
    let s = device.snapshot();
    println!("identification : {}", s.identification);
    println!("state          : {}", s.state);
    println!("wavelength     : {:.3}", s.wavelength);
    println!("grating        : {} ({})", s.grating_number, s.grating_label);
    println!("filter         : {} ({})", s.filter_number, s.filter_label);
    println!("shutter        : {}", s.shutter);
    if let Some(updated_at) = s.updated_at {
        println!("updated        : {}", updated_at.to_rfc3339());
    }
    println!("status         : {}", s.status_message.replace('\n', " | "));
}

fn build_transport(config: &TransportConfig) -> Result<Box<dyn Transport>, DeviceError> {
    let timeout = Duration::from_millis(config.timeout_ms);
    match config.kind {
        TransportKind::Serial => {
            #[cfg(feature = "tokio_serial")]
            {
                let transport = cornerstone130::transport::SerialTransportBuilder::new(
                    config.resource.clone(),
                    config.baud_rate,
                )
                .with_timeout(timeout)
                .with_line_terminator(config.line_terminator.clone())
                .build();
                Ok(Box::new(transport))
            }
            #[cfg(not(feature = "tokio_serial"))]
            {
                let _ = timeout;
                Err(DeviceError::FeatureNotEnabled("tokio_serial".to_string()))
            }
        }
        TransportKind::Visa => {
            #[cfg(feature = "instrument_visa")]
            {
                let transport = cornerstone130::transport::VisaTransport::new(config.resource.clone())
                    .with_timeout(timeout)
                    .with_line_terminator(config.line_terminator.clone());
                Ok(Box::new(transport))
            }
            #[cfg(not(feature = "instrument_visa"))]
            {
                let _ = timeout;
                Err(DeviceError::FeatureNotEnabled("instrument_visa".to_string()))
            }
        }
    }
}
