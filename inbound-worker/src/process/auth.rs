//! Sender authentication policy for inbound messages.
//!
//! A message is dropped only on a confirmed SPF failure. Everything else is
//! accepted, including messages whose SPF block is missing: Mandrill leaves it
//! out when the check itself errored, and a regression in the payload must
//! not block legitimate mail.
//!
//! Reference: https://mailchimp.com/developer/transactional/docs/webhooks/#detailed-webhook-format-responses

use tracing::warn;

use super::envelope::{DkimCheck, InboundMessage, SpfCheck, SpfResult};

/// Why a message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Spf(SpfResult),
}

/// Evaluate the policy, returning the reason when the message must be dropped.
pub fn rejection(message: &InboundMessage) -> Option<Rejection> {
    spf_rejection(message.spf.as_ref()).or_else(|| dkim_rejection(message.dkim.as_ref()))
}

/// Returns `true` when the message must be dropped.
pub fn rejects(message: &InboundMessage) -> bool {
    match rejection(message) {
        Some(reason) => {
            warn!(
                email = ?message.email,
                from_email = ?message.from_email,
                reason = ?reason,
                "mandrill_event_rejected"
            );
            true
        }
        None => false,
    }
}

fn spf_rejection(spf: Option<&SpfCheck>) -> Option<Rejection> {
    match spf?.result? {
        result @ (SpfResult::Fail | SpfResult::Temperror | SpfResult::Permerror) => {
            Some(Rejection::Spf(result))
        }
        SpfResult::Pass
        | SpfResult::Neutral
        | SpfResult::Softfail
        | SpfResult::None
        | SpfResult::Unknown => None,
    }
}

/// Never rejects.
///
/// Orange and Wanadoo senders are known to deliver legitimate mail with a
/// signature that fails verification, so `signed && !valid` is not grounds
/// for dropping a message. Keep this a no-op unless those senders are handled
/// some other way.
fn dkim_rejection(_dkim: Option<&DkimCheck>) -> Option<Rejection> {
    None
}
