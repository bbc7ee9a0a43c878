// Main entry point for Dockge Rust backend
mod auth;
mod broadcast_engine;
mod broadcasts;
mod check_version;
mod compose_cache;
mod config;
mod db;
mod docker;
mod file_watcher;
mod rate_limiter;
mod server;
mod socket_handlers;
mod stack;
mod stack_model;
mod static_files;
mod terminal;
mod update_checker;
mod utils;

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Welcome to dockge!");

    // Parse configuration
    let config = config::Config::parse()?;

    info!("Starting Dockge server...");
    info!("Port: {}", config.port);
    info!("Stacks directory: {}", config.stacks_dir.display());

    // Start the server
    server::serve(config).await?;

    Ok(())
}
