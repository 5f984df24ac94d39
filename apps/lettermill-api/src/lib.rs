//! Lettermill API - letter generation and tracked email delivery
//!
//! Provides REST endpoints for:
//! - Fire-and-forget letter sends with background dispatch
//! - Letter previews with caller overrides
//! - Delivery webhooks and a reconciliation poll
//! - Manual retries and per-user status streams

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod provider;
pub mod state;
pub mod store;
pub mod tracker;

use state::AppState;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/tabs/:tab_id/send-email", post(handlers::send_email))
        .route(
            "/api/tabs/:tab_id/generate-preview",
            post(handlers::generate_preview),
        )
        .route("/api/webhooks/delivery", post(handlers::delivery_webhook))
        .route("/api/email-status/poll", post(handlers::poll_status))
        .route("/api/jobs/:id", get(handlers::get_job))
        .route("/api/jobs/:id/retry", post(handlers::retry_job))
        .route(
            "/api/notifications/:user_id/stream",
            get(handlers::notifications_stream),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
