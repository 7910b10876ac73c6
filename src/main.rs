//! PDF Joiner Server
//!
//! Upload PDFs into short-lived sessions, preview pages as cached
//! thumbnails, and merge selected pages into a single output document.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pdf_joiner_server::config::Config;
use pdf_joiner_server::pdf::DefaultPdfEngine;
use pdf_joiner_server::routes;
use pdf_joiner_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_joiner_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    config
        .ensure_directories()
        .context("failed to create content store directories")?;

    tracing::info!("Starting PDF Joiner Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Upload root: {}", config.storage.upload_root.display());
    tracing::info!("Thumbnail root: {}", config.storage.thumbnail_root.display());
    tracing::info!("Merged root: {}", config.storage.merged_root.display());

    let engine = Arc::new(DefaultPdfEngine::new());
    let state = AppState::new(config.clone(), engine);

    // Background sweep of expired sessions, independent of traffic
    start_cleanup_task(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .nest("/api", routes::api_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            routes::track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::extract::DefaultBodyLimit::max(
            (config.limits.max_file_size as usize)
                .saturating_mul(config.limits.max_files_per_request)
                .saturating_add(1024 * 1024),
        ))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    tracing::info!("PDF Joiner Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Periodic garbage collection of expired sessions and their artifacts
fn start_cleanup_task(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval_secs = state.config().cleanup.sweep_interval_secs;
    let max_age = chrono::Duration::seconds(state.config().cleanup.session_max_age_secs as i64);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        // The first tick fires immediately; skip it so boot stays quick
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = state.sessions().sweep_expired(max_age).await;
            if !removed.is_empty() {
                let dropped = state.jobs().forget_sessions(&removed).await;
                tracing::info!(
                    sessions = removed.len(),
                    jobs = dropped,
                    "Scheduled cleanup complete"
                );
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
