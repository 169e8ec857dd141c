//! Webhook payload processing module.
//!
//! This module turns raw webhook payloads from the inbound_webhooks queue
//! into normalized emails for the normalized_emails queue.
//!
//! ## Processing Flow
//!
//! ```text
//! InboundWebhook → process_webhook() → decode → SPF filter → normalize → Vec<NormalizedEmail>
//! ```
//!
//! Everything here is synchronous. The only I/O is writing attachment
//! content through the injected [`TempStorage`].

pub mod attachment;
pub mod auth;
pub mod envelope;
pub mod error;
pub mod mandrill;
pub mod message_id;

use tracing::info;

use crate::queue::{InboundWebhook, NormalizedEmail};

pub use attachment::{FsTempStorage, MaterializedAttachment, MemoryTempStorage, TempStorage};
pub use envelope::{decode_envelope, InboundMessage};
pub use error::{AttachmentError, DecodeError, ProcessError};
pub use mandrill::{normalize_message, normalize_params};
pub use message_id::message_id;

/// Process an inbound webhook into normalized emails.
///
/// Routes to the provider-specific normalizer based on the webhook type.
pub fn process_webhook(
    webhook: InboundWebhook,
    storage: &dyn TempStorage,
) -> Result<Vec<NormalizedEmail>, ProcessError> {
    info!("webhook_process_start");

    let emails = match webhook {
        InboundWebhook::Mandrill(payload) => {
            info!(
                provider = "mandrill",
                events_length = payload.mandrill_events.len(),
                "webhook_routing"
            );
            normalize_params(&payload.mandrill_events, storage)?
        }
    };

    info!(email_count = emails.len(), "webhook_process_complete");

    Ok(emails)
}
