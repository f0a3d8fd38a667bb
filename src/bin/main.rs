use anyhow::{Context, Result};
use arbitra::{Simulation, SimulationConfig};
use arbitra_core::ProtocolConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbitra")]
#[command(about = "Arbitra escrow and arbitration protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session and print its report as JSON
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        /// Include the full event log in the report
        #[arg(long)]
        events: bool,
    },

    /// Print the effective protocol configuration as YAML
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
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
        Commands::Simulate { config, events } => {
            let config = SimulationConfig::from_file(&config)?;
            info!("Running {} scripted processes", config.processes.len());
            let simulation = Simulation::setup(config).context("Failed to set up simulation")?;
            let mut report = match simulation.run().await {
                Ok(report) => report,
                Err(e) => {
                    error!("Simulation failed: {:#}", e);
                    return Err(e);
                }
            };
            if !events {
                report.events.clear();
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config { config } => {
            let config = match config {
                Some(path) => ProtocolConfig::from_file(&path)
                    .with_context(|| format!("Invalid protocol config {}", path.display()))?,
                None => ProtocolConfig::default(),
            };
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}
