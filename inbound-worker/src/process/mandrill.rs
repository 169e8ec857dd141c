//! Mandrill inbound payload normalization.
//!
//! Turns the `mandrill_events` field of an inbound webhook into
//! [`NormalizedEmail`] records:
//!
//! ```text
//! decode_envelope() → auth::rejects() → normalize_message()
//! ```
//!
//! Rejected events are left out of the result, which keeps the input order.

use tracing::info;

use super::attachment::{discard, materialize_all, TempStorage};
use super::auth;
use super::envelope::{decode_envelope, InboundMessage, Recipient};
use super::error::{AttachmentError, ProcessError};
use crate::queue::NormalizedEmail;

/// Normalize every accepted inbound message of a `mandrill_events` payload.
///
/// On failure no attachment files are left behind, including those of
/// messages that normalized fine before the failing one.
pub fn normalize_params(
    mandrill_events: &str,
    storage: &dyn TempStorage,
) -> Result<Vec<NormalizedEmail>, ProcessError> {
    let messages = decode_envelope(mandrill_events)?;
    let inbound_count = messages.len();

    let mut emails = Vec::with_capacity(inbound_count);
    for message in messages.into_iter().filter(|message| !auth::rejects(message)) {
        match normalize_message(message, storage) {
            Ok(email) => emails.push(email),
            Err(e) => {
                for email in &emails {
                    discard(&email.attachments, storage);
                }
                return Err(e.into());
            }
        }
    }

    info!(
        inbound_count = inbound_count,
        normalized_count = emails.len(),
        rejected_count = inbound_count - emails.len(),
        "mandrill_normalize_complete"
    );

    Ok(emails)
}

/// Build the normalized record for one accepted message.
///
/// Writes one temporary file per attachment and inline image.
pub fn normalize_message(
    message: InboundMessage,
    storage: &dyn TempStorage,
) -> Result<NormalizedEmail, AttachmentError> {
    let attachments = materialize_all(
        message
            .attachments
            .iter()
            .chain(message.images.iter())
            .map(|(_, descriptor)| descriptor),
        storage,
    )?;

    let bcc = resolve_bcc(&message);
    let from = message
        .from_email
        .as_deref()
        .map(|address| full_email(address, message.from_name.as_deref()));

    Ok(NormalizedEmail {
        to: recipients(&message.to),
        cc: recipients(&message.cc),
        bcc,
        headers: message.headers,
        from,
        subject: message.subject,
        text: message.text.unwrap_or_default(),
        html: message.html.unwrap_or_default(),
        raw_body: message.raw_msg,
        attachments,
        email: message.email,
        spam_report: message.spam_report,
    })
}

/// Format a contact as `Name <address>`, or just `address` without a name.
pub fn full_email(address: &str, name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{} <{}>", name, address),
        _ => address.to_string(),
    }
}

fn recipients(list: &[Recipient]) -> Vec<String> {
    list.iter()
        .map(|recipient| full_email(&recipient.address, recipient.name.as_deref()))
        .collect()
}

/// Infer the blind-copied recipient.
///
/// `email` is where Mandrill received the message. When it is not among the
/// visible To/Cc addresses the message reached us as a BCC, and the local part
/// of the address stands in for the display name.
pub fn resolve_bcc(message: &InboundMessage) -> Vec<String> {
    let Some(email) = message.email.as_deref() else {
        return Vec::new();
    };

    let visible = message
        .to
        .iter()
        .chain(message.cc.iter())
        .any(|recipient| recipient.address == email);

    if visible {
        return Vec::new();
    }

    let local_part = email.split('@').next().unwrap_or(email);
    vec![full_email(email, Some(local_part))]
}
