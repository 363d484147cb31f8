//! Market Relay - gateway entry point
//!
//! Binds the relay endpoint and serves until Ctrl+C or SIGTERM.

use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_relay::{Config, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Market Relay gateway");

    let config = Config::load()?;
    info!(
        host = %config.host,
        port = config.port,
        ws_path = %config.ws_path,
        relay_opaque = config.relay_opaque,
        "Configuration loaded"
    );

    let server = GatewayServer::bind(config).await?;
    server.serve(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
