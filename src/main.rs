// src/main.rs - Deploy daemon entry point
use clap::Parser;
use firmware_ci::config;
use firmware_ci::notify::PusherConnection;
use firmware_ci::{Deployer, Orchestrator, RunExit};
use std::path::PathBuf;

/// Flash every published firmware build onto the attached device and check that it boots.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "firmware-ci.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("Starting firmware-ci {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config.display());

    let mut config = config::load_config_or_default(&args.config)?;
    config.apply_env();
    config.validate().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        tracing::error!("Set PUSHER_KEY in the environment or [pusher] key in the config file");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!("Device: {} @ {} baud", config.device.serial, config.device.baud);
    tracing::info!("Artifacts: {}", config.artifact.base_url);

    let deployer = Deployer::from_config(&config)?;
    let connection = PusherConnection::connect(&config.pusher);
    let mut orchestrator = Orchestrator::new(
        connection,
        deployer,
        config.pusher.channel.clone(),
        config.pusher.event.clone(),
    );

    let exit = orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let stats = orchestrator.stats();
    tracing::info!(
        "Stopped after {} deployments ({} ok, {} failed)",
        stats.deployments,
        stats.succeeded,
        stats.failed
    );

    match exit {
        RunExit::Shutdown => Ok(()),
        RunExit::TransportClosed => Err("notification transport closed".into()),
    }
}
