//! HTTP API.
//!
//! A thin axum layer over the [`Orchestrator`].  Errors are rendered as
//! `{"error": {"type", "message"}}` with a status code chosen from the error's kind.

mod error;
mod handlers;
pub mod models;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;

pub use error::{ApiError, ApiResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    started: Instant,
}

impl AppState {
    /// Wraps an orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started: Instant::now(),
        }
    }
}

/// Builds the router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    // Base64 inflates by 4/3; leave headroom for the rest of the JSON body.
    let body_limit = orchestrator.upload_policy().max_image_bytes / 3 * 4 + 64 * 1024;
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/:id", axum::routing::delete(handlers::end_session))
        .route(
            "/api/sessions/:id/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route("/api/sessions/:id/clear", post(handlers::clear))
        .route("/api/sessions/:id/cancel", post(handlers::cancel))
        .route("/api/sessions/:id/settings", put(handlers::update_settings))
        .route("/api/sessions/:id/stats", get(handlers::stats))
        .route("/api/sessions/:id/share", post(handlers::share))
        .route("/api/sessions/:id/export/:format", get(handlers::export))
        .route("/shared/:token", get(handlers::view_shared))
        .route("/shared/:token/stats", get(handlers::shared_stats))
        .route("/shared/:token/export/:format", get(handlers::export_shared))
        .with_state(AppState::new(orchestrator))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Serves the API on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(orchestrator);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| Error::io("HTTP server failed", err))
}
