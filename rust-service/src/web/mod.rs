//! Web server module for webhook ingestion and message queries.
//!
//! Routes:
//! - `POST /webhook` - signed SMS webhook ingestion
//! - `GET /messages` - paginated, filtered message listing
//! - `GET /stats` - aggregate statistics
//! - `GET /health/live`, `GET /health/ready` - probes

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    live, messages, ready, stats, webhook, AppState, ErrorResponse, HealthResponse,
    MessagesQuery, WebhookPayload, WebhookResponse,
};
pub use signature::verify_webhook_signature;

/// Build the application router over the given state.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/webhook", post(webhook))
        .route("/messages", get(messages))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
