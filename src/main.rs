//! Docker observer daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

use docker_observer::{Config, DockerObserver, DockerRuntime, LoggingNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting docker-observer with config: {:?}", cfg);

    // Container Runtime (Docker)
    let runtime = DockerRuntime::connect(&cfg.endpoint, cfg.timeout)?;

    let observer = DockerObserver::new(&cfg, Arc::new(runtime))?;
    observer.subscribe(Arc::new(LoggingNotifier));
    observer.start()?;

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    observer.shutdown().await?;
    info!(
        "Shutdown complete. {} endpoints were known at exit.",
        observer.endpoints().len()
    );
    Ok(())
}
