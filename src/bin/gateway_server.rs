//! Gateway binary entry point.
//!
//! Parses `Config` from CLI flags / `GATEWAY_*` environment variables,
//! initializes structured logging, starts the gateway, and waits for
//! `SIGINT`/`SIGTERM` before shutting down gracefully.

use clap::Parser;
use connect_graphql_gateway::{Config, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();
    let server = GatewayServer::new(config);

    server.start().await?;

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping gateway");

    server.stop().await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
