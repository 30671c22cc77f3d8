//! CLI entry point.
//!
//! `vectorstar sweep` runs a raw wave-parameter acquisition from flags
//! and/or a TOML config file and writes Touchstone series to an output
//! directory. `vectorstar idn` checks the connection by printing the
//! instrument identity.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use vectorstar::{raw_sweep, SweepConfig, VectorStar, VisaResource};

#[derive(Parser)]
#[command(name = "vectorstar")]
#[command(about = "Raw wave-parameter acquisition for Anritsu VectorStar VNAs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire raw wave-parameter sweeps and write Touchstone files
    Sweep {
        /// TOML config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// VISA resource address, e.g. TCPIP::169.254.63.67::INSTR
        #[arg(long)]
        address: Option<String>,

        /// Number of sweeps to acquire
        #[arg(long)]
        sweeps: Option<usize>,

        /// IF bandwidth in Hz
        #[arg(long)]
        ifbw: Option<f64>,

        /// Start frequency in Hz
        #[arg(long)]
        start: Option<f64>,

        /// Stop frequency in Hz
        #[arg(long)]
        stop: Option<f64>,

        /// Frequency points per sweep
        #[arg(long)]
        points: Option<u32>,

        /// Standalone-source power in dBm (both ports)
        #[arg(long)]
        power: Option<f64>,

        /// Extender power in dBm (both ports, above 54 GHz)
        #[arg(long)]
        power_extended: Option<f64>,

        /// Response timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Run against the in-process mock instrument
        #[arg(long)]
        mock: bool,

        /// Output directory for the .s2p series
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Base name for output files
        #[arg(long, default_value = "sweep")]
        name: String,

        /// Also write the across-sweep mean S-parameters
        #[arg(long)]
        sparams: bool,
    },

    /// Print the instrument identity (*IDN?)
    Idn {
        /// VISA resource address
        address: String,

        /// Response timeout in milliseconds
        #[arg(long, default_value_t = vectorstar::scpi::DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sweep {
            config,
            address,
            sweeps,
            ifbw,
            start,
            stop,
            points,
            power,
            power_extended,
            timeout_ms,
            mock,
            out,
            name,
            sparams,
        } => {
            let mut cfg = match config {
                Some(path) => SweepConfig::from_toml_file(path)?,
                None => SweepConfig::default(),
            };
            if let Some(address) = address {
                cfg.address = address;
            }
            if let Some(sweeps) = sweeps {
                cfg.sweeps = sweeps;
            }
            if ifbw.is_some() {
                cfg.if_bandwidth = ifbw;
            }
            if start.is_some() {
                cfg.freq_start = start;
            }
            if stop.is_some() {
                cfg.freq_stop = stop;
            }
            if points.is_some() {
                cfg.points = points;
            }
            if power.is_some() {
                cfg.power = power;
            }
            if power_extended.is_some() {
                cfg.power_extended = power_extended;
            }
            if let Some(timeout_ms) = timeout_ms {
                cfg.timeout_ms = timeout_ms;
            }
            if mock {
                cfg.mock = true;
            }

            run_sweep(&cfg, &out, &name, sparams).await
        }
        Commands::Idn {
            address,
            timeout_ms,
        } => {
            let resource: VisaResource = address.parse()?;
            let vna =
                VectorStar::connect(&resource, Duration::from_millis(timeout_ms)).await?;
            println!("{}", vna.identity().await?);
            Ok(())
        }
    }
}

async fn run_sweep(config: &SweepConfig, out: &Path, name: &str, sparams: bool) -> Result<()> {
    let data = raw_sweep(config).await?;

    std::fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;

    let written = data.write_wave_series(out, name)?;
    tracing::info!(
        "wrote {} wave-parameter files to {}",
        written.len(),
        out.display()
    );

    if sparams {
        let path = data.write_mean_s(out, name)?;
        tracing::info!("wrote mean S-parameters to {}", path.display());
    }

    Ok(())
}
