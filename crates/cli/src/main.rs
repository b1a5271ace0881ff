//! driftless CLI - Main Entry Point
//!
//! Converges compute instances, disks, virtual networks and Kubernetes
//! clusters on the control plane toward TOML desired-state files.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use driftless_common::{default_config_path, ClientConfig};
use driftless_provider::{
    Api, ComputeResource, DiskResource, Engine, HttpApiClient, K8sResource, VinsResource,
};

mod commands;
mod output;

use commands::{config::ConfigCommands, ResourceCommands};

/// driftless - declarative convergence for cloud resources
#[derive(Parser)]
#[command(name = "driftless")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value_os_t = default_config_path(), global = true)]
    config: PathBuf,

    /// Controller URL, overrides the configuration file
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token for the controller
    #[arg(long, env = "DRIFTLESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage compute instances
    #[command(subcommand)]
    Compute(ResourceCommands),

    /// Manage standalone disks
    #[command(subcommand)]
    Disk(ResourceCommands),

    /// Manage virtual networks
    #[command(subcommand)]
    Vins(ResourceCommands),

    /// Manage Kubernetes clusters
    #[command(subcommand)]
    K8s(ResourceCommands),

    /// Inspect or initialize the client configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.log_json);

    let mut config = ClientConfig::load(&cli.config)?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if cli.token.is_some() {
        config.token = cli.token;
    }

    match cli.command {
        Commands::Compute(cmd) => {
            commands::execute::<ComputeResource>(cmd, &connect(&config)?, cli.format).await?
        }
        Commands::Disk(cmd) => {
            commands::execute::<DiskResource>(cmd, &connect(&config)?, cli.format).await?
        }
        Commands::Vins(cmd) => {
            commands::execute::<VinsResource>(cmd, &connect(&config)?, cli.format).await?
        }
        Commands::K8s(cmd) => {
            commands::execute::<K8sResource>(cmd, &connect(&config)?, cli.format).await?
        }
        Commands::Config(cmd) => commands::config::execute(cmd, &cli.config, &config, cli.format)?,
        Commands::Version => {
            println!("driftless v{}", driftless_common::VERSION);
        }
    }

    Ok(())
}

fn init_logging(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Engine over HTTP whose calls are cancelled on Ctrl-C
fn connect(config: &ClientConfig) -> Result<Engine> {
    config.validate()?;
    let client = HttpApiClient::new(config)?;

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling convergence");
            on_signal.cancel();
        }
    });

    let api = Api::new(Arc::new(client), config).with_cancellation(token);
    Ok(Engine::with_api_lookup(api))
}
