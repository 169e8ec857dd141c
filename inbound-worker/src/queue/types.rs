//! Queue message types for the two-queue architecture.
//!
//! This module defines the message formats for:
//! - `inbound_webhooks` queue: Raw webhook payloads from web server
//! - `normalized_emails` queue: One normalized email per accepted message

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::MaterializedAttachment;

/// Queue name for raw inbound webhooks.
pub const INBOUND_QUEUE: &str = "inbound_webhooks";

/// Queue name for normalized emails.
pub const NORMALIZED_QUEUE: &str = "normalized_emails";

// =============================================================================
// Inbound Webhook Types (inbound_webhooks queue)
// =============================================================================

/// Raw inbound webhook payload stored in the inbound_webhooks queue.
///
/// The web server immediately enqueues raw payloads without parsing,
/// allowing it to respond in microseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum InboundWebhook {
    /// Raw Mandrill form data
    #[serde(rename = "mandrill")]
    Mandrill(MandrillRawPayload),
}

/// Raw Mandrill webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandrillRawPayload {
    /// JSON array of events, exactly as posted
    pub mandrill_events: String,
}

// =============================================================================
// Normalized Email Types (normalized_emails queue)
// =============================================================================

/// Provider-independent view of one received email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEmail {
    /// Formatted `Name <address>` or bare address strings
    pub to: Vec<String>,
    pub cc: Vec<String>,
    /// Receiving address when it was not visible in To/Cc; at most one entry
    pub bcc: Vec<String>,
    pub headers: Option<Value>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub text: String,
    pub html: String,
    /// Full RFC 5322 source
    pub raw_body: Option<String>,
    pub attachments: Vec<MaterializedAttachment>,
    /// Address at which the provider received the message
    pub email: Option<String>,
    pub spam_report: Option<Value>,
}
