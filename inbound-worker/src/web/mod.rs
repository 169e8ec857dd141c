//! Web server module for handling inbound webhooks.
//!
//! This module provides a thin, fast web server that:
//! - Receives Mandrill inbound webhooks
//! - Verifies the webhook signature
//! - Immediately enqueues raw payloads to RabbitMQ
//! - Returns 200 OK in microseconds
//!
//! All decoding and normalization happens in the background processor.

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};

pub use handlers::{
    health, mandrill_webhook, mandrill_webhook_check, AppState, HealthResponse, WebhookResponse,
    MANDRILL_EVENTS_FIELD,
};
pub use signature::{
    is_signature_verification_enabled, mandrill_signature, verify_mandrill_signature,
    SIGNATURE_HEADER,
};

/// Build the webhook router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/webhooks/mandrill",
            post(mandrill_webhook).head(mandrill_webhook_check),
        )
        .with_state(state)
}
