// Main entry point for product-server.
// Parses configuration, sets up logging and hands control to the supervisor,
// which owns every component until a shutdown signal arrives.

mod catalog;
mod config;
mod queue;
mod shutdown_signal;
mod storage;
mod supervisor;
mod web;
mod worker;

use clap::Parser;
use config::AppConfig;
use shutdown_signal::shutdown_signal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line args and environment variables
    let config = AppConfig::parse();

    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        host = %config.host,
        port = config.port,
        storage_root = %config.storage_root.display(),
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "Starting product-server..."
    );

    match supervisor::run(config, shutdown_signal()).await {
        Ok(()) => {
            tracing::info!("product-server has shut down.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("FATAL: {}", e);
            eprintln!("FATAL: {}. Exiting.", e);
            ExitCode::FAILURE
        }
    }
}
