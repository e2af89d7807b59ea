//! HTTP entry point for an external scheduler (host cron, cloud scheduler).

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::regen::RegenerationService;

pub mod error;
pub mod routes;

pub use error::ApiError;
use routes::{health_handler, method_not_allowed, regenerate_handler};

pub struct AppState {
    pub service: RegenerationService,
    pub secret: Option<String>,
    /// Cancelled on shutdown; in-flight cycles stop issuing updates.
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/regenerate",
            get(regenerate_handler).fallback(method_not_allowed),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn serve(
    bind_addr: &str,
    service: RegenerationService,
    secret: Option<String>,
) -> anyhow::Result<()> {
    if secret.is_none() {
        warn!("No trigger secret configured, /regenerate accepts unauthenticated calls");
    }

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        service,
        secret,
        shutdown: shutdown.clone(),
    });

    info!("Binding to {bind_addr}");
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Server running on {bind_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    info!("Server shut down");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
