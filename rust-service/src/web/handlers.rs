//! Webhook and query endpoint handlers.
//!
//! The ingestion path does exactly four things, in order:
//! 1. Verify the HMAC signature over the raw body
//! 2. Parse the payload
//! 3. Insert idempotently, keyed on the provider's message id
//! 4. Acknowledge, labelling the outcome for observability
//!
//! Duplicate delivery is a success from the caller's perspective; only the
//! outcome label distinguishes it.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::store::{ListFilter, NewMessage, SqliteMessageStore};
use crate::web::signature::verify_webhook_signature;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteMessageStore>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteMessageStore) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
        }
    }
}

// =============================================================================
// Health Checks
// =============================================================================

/// Health probe response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe. Succeeds whenever the process is up.
pub async fn live() -> Json<HealthResponse> {
    Json(HealthResponse { status: "alive" })
}

/// Readiness probe.
///
/// Ready only if the store is reachable and the webhook secret is configured;
/// otherwise a well-formed unavailable response, never a bare status value.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.config.webhook_secret.is_empty() {
        warn!("readiness_secret_missing");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
            }),
        );
    }

    match state.store.ping() {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ready" })),
        Err(e) => {
            warn!(error = %e, "readiness_store_unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}

// =============================================================================
// Webhook Ingestion
// =============================================================================

/// Inbound SMS webhook payload.
///
/// `message_id`, `from`, `to`, and `ts` are required; a delivery missing any
/// of them is malformed and is never persisted.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub message_id: String,
    #[serde(rename = "from")]
    pub from_msisdn: String,
    #[serde(rename = "to")]
    pub to_msisdn: String,
    pub ts: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Webhook acknowledgment body.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// SMS webhook endpoint.
///
/// The signature is computed over the exact body bytes as received, so the
/// body is taken raw and parsed only after verification. Missing and wrong
/// signatures are indistinguishable to the caller.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers.get("X-Signature").and_then(|v| v.to_str().ok());

    if !verify_webhook_signature(&state.config.webhook_secret, &body, signature) {
        counter!("webhook_requests_total", "result" => "invalid_signature").increment(1);
        warn!(result = "invalid_signature", "webhook_rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse {
                status: "invalid_signature",
            }),
        );
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            counter!("webhook_requests_total", "result" => "malformed").increment(1);
            warn!(error = %e, result = "malformed", "webhook_rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(WebhookResponse {
                    status: "malformed",
                }),
            );
        }
    };

    let message = NewMessage {
        message_id: payload.message_id,
        from_msisdn: payload.from_msisdn,
        to_msisdn: payload.to_msisdn,
        ts: payload.ts,
        text: payload.text,
    };

    match state.store.insert(&message) {
        Ok(outcome) => {
            counter!("webhook_requests_total", "result" => outcome.as_label()).increment(1);
            info!(
                message_id = %message.message_id,
                result = outcome.as_label(),
                dup = outcome.is_duplicate(),
                "webhook_accepted"
            );
            (StatusCode::OK, Json(WebhookResponse { status: "ok" }))
        }
        Err(e) => {
            counter!("webhook_requests_total", "result" => "error").increment(1);
            error!(message_id = %message.message_id, error = %e, "webhook_store_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse { status: "error" }),
            )
        }
    }
}

// =============================================================================
// Query API
// =============================================================================

/// Query string accepted by the messages endpoint.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "from")]
    pub from_msisdn: Option<String>,
    pub since: Option<String>,
    pub q: Option<String>,
}

/// Error body for failed query requests.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}

/// Paginated message listing.
///
/// Pagination is clamped here; the store imposes no cap of its own.
pub async fn messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> impl IntoResponse {
    let filter = ListFilter {
        from_msisdn: query.from_msisdn,
        since: query.since,
        q: query.q,
        limit: query.limit.unwrap_or(50).clamp(1, 100),
        offset: query.offset.unwrap_or(0).max(0),
    };

    match state.store.list(&filter) {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            error!(error = %e, "messages_query_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "storage unavailable",
                }),
            )
                .into_response()
        }
    }
}

/// Aggregate statistics over all stored messages.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.stats() {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "stats_query_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "storage unavailable",
                }),
            )
                .into_response()
        }
    }
}
