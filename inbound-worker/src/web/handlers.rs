//! Webhook endpoint handlers.
//!
//! These handlers are designed to be extremely fast - they only:
//! 1. Verify authentication
//! 2. Enqueue the raw payload to RabbitMQ
//! 3. Return immediately
//!
//! Decoding, SPF filtering and normalization happen in the background
//! processor. Mandrill only needs a 2xx to consider the delivery done, so
//! events later rejected by the processor are still acknowledged here.

use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::queue::{InboundWebhook, MandrillRawPayload, Publisher};
use crate::web::signature::{
    is_signature_verification_enabled, verify_mandrill_signature, SIGNATURE_HEADER,
};
use crate::Config;

/// Form field holding the JSON event array.
pub const MANDRILL_EVENTS_FIELD: &str = "mandrill_events";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Publisher,
}

impl AppState {
    pub fn new(config: Config, publisher: Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Mandrill Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

impl WebhookResponse {
    fn reply(code: StatusCode, status: &'static str) -> (StatusCode, Json<WebhookResponse>) {
        (code, Json(WebhookResponse { status }))
    }
}

/// Mandrill sends a HEAD request when a webhook URL is added and expects 200.
pub async fn mandrill_webhook_check() -> StatusCode {
    info!("mandrill_webhook_check");
    StatusCode::OK
}

/// Mandrill webhook endpoint.
///
/// This endpoint:
/// 1. Verifies the `X-Mandrill-Signature` header (if configured)
/// 2. Enqueues the raw `mandrill_events` string immediately
/// 3. Returns 200 OK
///
/// The form is taken as ordered pairs because every posted parameter is part
/// of the signed data.
pub async fn mandrill_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> impl IntoResponse {
    let mandrill_events = params
        .iter()
        .find(|(name, _)| name == MANDRILL_EVENTS_FIELD)
        .map(|(_, value)| value.clone());

    info!(
        param_count = params.len(),
        events_length = mandrill_events.as_ref().map(|s| s.len()).unwrap_or(0),
        has_signature = headers.contains_key(SIGNATURE_HEADER),
        "mandrill_webhook_received"
    );

    let config = &state.config;
    if is_signature_verification_enabled(&config.mandrill_webhook_keys, &config.mandrill_webhook_url)
    {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let keys = config.mandrill_webhook_keys.as_deref().unwrap_or_default();
        let url = config.mandrill_webhook_url.as_deref().unwrap_or_default();

        if !verify_mandrill_signature(keys, url, &params, signature) {
            warn!("mandrill_signature_invalid");
            return WebhookResponse::reply(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    } else {
        warn!("mandrill_signature_not_configured");
    }

    let Some(mandrill_events) = mandrill_events else {
        warn!("mandrill_events_missing");
        return WebhookResponse::reply(StatusCode::BAD_REQUEST, "missing_events");
    };

    let webhook = InboundWebhook::Mandrill(MandrillRawPayload { mandrill_events });

    if let Err(e) = state.publisher.publish_inbound(&webhook).await {
        error!(error = %e, "mandrill_publish_failed");
        return WebhookResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, "error");
    }

    info!("mandrill_enqueued");

    WebhookResponse::reply(StatusCode::OK, "enqueued")
}
