//! `openapi-mcp` binary.

use anyhow::Context as _;
use clap::Parser;
use openapi_mcp::config::{Config, LogFormat};
use openapi_mcp::{Gateway, McpServer, ToolRegistry, TransportStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_logging(&config);

    if let Err(e) = run(config).await {
        error!("Failed to start server: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let registry = ToolRegistry::from_spec_file(&config.spec, &config.target)
        .with_context(|| format!("load tools from {}", config.spec.display()))?;
    info!("Registered {} tools", registry.len());

    let gateway = Gateway::new(
        Arc::new(McpServer::new(registry)),
        Arc::new(TransportStore::new()),
    );
    let app = gateway.router();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    info!("MCP Server running on http://localhost:{}/mcp", config.port);
    info!("Using OpenAPI spec: {}", config.spec.display());
    info!("Proxying requests to: {}", config.target);

    let shutdown_gateway = gateway.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = shutdown_gateway.shutdown().await {
                error!("Error during shutdown: {e}");
            }
        })
        .await
        .context("server error")?;

    gateway.shutdown().await?;
    Ok(())
}
