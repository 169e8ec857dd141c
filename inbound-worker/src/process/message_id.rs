//! Message-Id resolution for normalized emails.
//!
//! Used as the AMQP message id when publishing, so duplicate deliveries of the
//! same email are recognizable downstream.

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::queue::NormalizedEmail;

/// Message-Id of a normalized email, without angle brackets.
///
/// Falls back to a SHA-256 digest of the receiving address, subject and raw
/// body when the headers carry no usable Message-Id.
pub fn message_id(email: &NormalizedEmail) -> String {
    extract_message_id_from_headers(email.headers.as_ref()).unwrap_or_else(|| {
        generate_fallback_id(
            email.email.as_deref().unwrap_or_default(),
            email.subject.as_deref().unwrap_or_default(),
            email.raw_body.as_deref().unwrap_or_default(),
        )
    })
}

/// Find the Message-Id in Mandrill's headers object.
///
/// Header names are matched case-insensitively. Repeated headers arrive as an
/// array of values; the first one is used.
fn extract_message_id_from_headers(headers: Option<&Value>) -> Option<String> {
    let headers = headers?.as_object()?;

    let value = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("message-id"))
        .map(|(_, value)| value)?;

    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Array(values) => values.iter().find_map(Value::as_str)?,
        _ => {
            warn!(value = %value, "message_id_header_unexpected_type");
            return None;
        }
    };

    let clean_id = raw.trim().trim_matches(|c| c == '<' || c == '>');
    if clean_id.is_empty() {
        return None;
    }

    Some(clean_id.to_string())
}

fn generate_fallback_id(email: &str, subject: &str, raw_body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update([0]);
    hasher.update(subject.as_bytes());
    hasher.update([0]);
    hasher.update(raw_body.as_bytes());
    let hash = hex::encode(hasher.finalize());

    debug!(email = %email, generated_id = %hash, "message_id_fallback");

    hash
}
