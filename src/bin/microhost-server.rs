use anyhow::{Context, Result};
use clap::Parser;
use microhost::{assemble, open_store};
use microhost_api::{AppState, HttpTokenVerifier};
use microhost_metrics::init_tracing;
use microhost_models::Config;
use microhost_runtime::{wait_for_daemon, DockerRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "microhost-server")]
#[command(about = "Builds, runs and keeps alive user-owned microservice containers")]
struct Cli {
    /// TOML config file; `MICROHOST_*` variables override it.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging).context("initializing logging")?;

    info!("Starting microhost server");
    info!("Configuration loaded: {:?}", config);

    let runtime = Arc::new(DockerRuntime::connect(&config.runtime)?);
    wait_for_daemon(
        runtime.as_ref(),
        Duration::from_secs(config.runtime.connect_timeout_secs),
    )
    .await
    .context("container runtime unreachable")?;
    info!("Container runtime reachable");

    let store = open_store(&config).await?;
    let services = assemble(&config, runtime, store)?;
    let verifier = Arc::new(HttpTokenVerifier::new(&config.auth)?);

    let shutdown = CancellationToken::new();

    let reconciler_handle = {
        let cancel = shutdown.clone();
        let reconciler = services.reconciler;
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    let server_handle = {
        let state = AppState::new(config.clone(), services.orchestrator, verifier);
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = microhost_api::start_server(state, cancel.clone()).await {
                error!("API server error: {}", e);
                cancel.cancel();
            }
        })
    };

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received shutdown signal"),
            Err(err) => warn!("Unable to listen for shutdown signal: {}", err),
        },
        _ = shutdown.cancelled() => {}
    }

    info!("Shutting down microhost server...");
    shutdown.cancel();

    if let Err(e) = server_handle.await {
        warn!("API server task ended abnormally: {}", e);
    }
    if let Err(e) = reconciler_handle.await {
        warn!("Reconciler task ended abnormally: {}", e);
    }

    info!("microhost server shutdown complete");
    Ok(())
}
