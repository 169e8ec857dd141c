//! Error types for webhook processing.

use thiserror::Error;

/// The `mandrill_events` envelope could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("mandrill_events is not a JSON array of events: {0}")]
    Json(#[from] serde_json::Error),

    #[error("inbound event {index} has no msg object")]
    MissingMessage { index: usize },

    #[error("inbound event {index} has a malformed msg: {source}")]
    Message {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// An attachment descriptor could not be turned into a stored file.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment has no name")]
    MissingName,

    #[error("attachment {name:?} has no content")]
    MissingContent { name: String },

    #[error("attachment {name:?} is not valid base64: {source}")]
    InvalidBase64 {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to store attachment {name:?}: {source}")]
    Storage {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Any failure while turning an envelope into normalized emails.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}
