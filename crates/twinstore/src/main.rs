use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use twinconf::TwinConfig;

use twinstore::{telemetry, web};

/// HTTP front end for an IPFS node and an S3 bucket
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, read in place of ./twinstore.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides bind.http_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration with secrets redacted and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = TwinConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.bind.http_port = port;
    }
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let telemetry = telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;

    tracing::info!(
        files = ?sources.files,
        env_overrides = ?sources.env_overrides,
        otlp = telemetry.exporting(),
        "configuration loaded"
    );

    let store = Arc::new(twinstore::connect(&config)?);
    let app = web::router(web::WebState::new(store, config.bind.max_upload_bytes));

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.bind.http_port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    tracing::info!(%bind_addr, "twinstore listening");

    let shutdown_token = CancellationToken::new();
    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });
    let server = tokio::spawn(async move { server.await });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, containers)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        result = sigterm() => {
            result?;
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server shutdown with error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
    }

    tracing::info!("Shutdown complete");
    telemetry.shutdown();

    Ok(())
}

#[cfg(unix)]
async fn sigterm() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
