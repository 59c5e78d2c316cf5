//! HTTP server setup and routing
//!
//! Sets up the Axum HTTP server with the questionnaire routes. CORS is
//! permissive because the static survey frontend is served from a
//! different origin.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::taxonomy::Taxonomy;
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub db_pool: SqlitePool,
    /// Read-only tag lookup, loaded once at startup
    pub taxonomy: Arc<Taxonomy>,
}

/// Build the application router
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))
        // Questionnaire
        .route("/questionnaire/submit", post(super::handlers::submit))
        .route(
            "/questionnaire/search-problems",
            get(super::handlers::search_problems),
        )
        .route(
            "/questionnaire/available-tags",
            get(super::handlers::available_tags),
        )
        // Attach application context
        .with_state(ctx)
        // Enable CORS for the cross-origin frontend
        .layer(CorsLayer::permissive())
}

/// Run the HTTP API server
pub async fn run(config: Config, db_pool: SqlitePool, taxonomy: Arc<Taxonomy>) -> Result<()> {
    let ctx = AppContext { db_pool, taxonomy };
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
