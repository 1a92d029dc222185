//! wavelib - local audio library service
//!
//! Imports audio tracks from video URLs into a library folder and serves
//! the library over HTTP, with per-import progress streams.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wavelib_server::config::{Args, ServerSettings};
use wavelib_server::import::{ensure_binary, ImportCoordinator, YtDlpFetcher};
use wavelib_server::library::store::DOWNLOADER_BINARY_NAME;
use wavelib_server::library::LibraryStore;
use wavelib_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Settings pick the log filter, so they resolve before tracing starts
    let args = Args::parse();
    let settings = ServerSettings::resolve(&args).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wavelib v{}", env!("CARGO_PKG_VERSION"));
    settings.log_summary();

    // Directory creation and initial rescan; either failing aborts startup
    let library = Arc::new(
        LibraryStore::open(&settings.library_path)
            .await
            .context("Failed to open library")?,
    );
    info!("Library loaded: {} tracks", library.len().await);

    let binary = match ensure_binary(&settings.downloader, library.root()).await {
        Ok(binary) => binary,
        Err(e) => {
            warn!("Downloader bootstrap failed, falling back to PATH: {}", e);
            DOWNLOADER_BINARY_NAME.into()
        }
    };
    info!("Downloader: {}", binary.display());

    let coordinator = ImportCoordinator::new(
        Arc::clone(&library),
        Arc::new(YtDlpFetcher::new(binary)),
        settings.progress_interval(),
    );

    let app = wavelib_server::build_router(AppState::new(coordinator));

    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("Failed to bind to {}:{}", settings.host, settings.port))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
