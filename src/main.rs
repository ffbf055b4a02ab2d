//! Roomwire
//!
//! Runs either side of the venue event pipeline:
//! - `gateway`: MQTT hardware traffic in, domain events onto the bus,
//!   bus commands back out to hardware
//! - `realtime`: domain events from the bus out to WebSocket dashboards

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use roomwire::config::{generate_default_config, Config, ConfigSource, LoadedConfig};
use roomwire::gateway::IngestionGateway;
use roomwire::{api, bus, logging, realtime};

#[derive(Parser)]
#[command(name = "roomwire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Venue automation event gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MQTT ingestion gateway
    Gateway,

    /// Run the WebSocket broadcast server
    Realtime,

    /// Print a default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let loaded = match &cli.config {
        Some(path) => LoadedConfig {
            config: Config::load_with_env(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            source: ConfigSource::File(path.clone()),
            rejected: Vec::new(),
        },
        None => Config::load_default(),
    };

    logging::init(&loaded.config.logging).context("Failed to initialize logging")?;
    loaded.log_source();
    let config = loaded.config;

    match cli.command {
        Commands::Gateway => run_gateway(config).await,
        Commands::Realtime => run_realtime(config).await,
        Commands::InitConfig => Ok(()),
    }
}

async fn run_gateway(config: Config) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ingestion gateway");

    config
        .validate_gateway()
        .context("Invalid gateway configuration")?;

    let bus = bus::connect(&config.bus)
        .await
        .context("Failed to connect to the event bus")?;
    let gateway = IngestionGateway::new(config, bus)?;

    gateway.run(api::shutdown_signal()).await?;
    Ok(())
}

async fn run_realtime(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.realtime.port,
        "Starting realtime server"
    );

    let bus = bus::connect(&config.bus)
        .await
        .context("Failed to connect to the event bus")?;

    realtime::run(config.realtime, bus, api::shutdown_signal()).await?;
    Ok(())
}
