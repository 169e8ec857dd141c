//! Inbound - Mandrill inbound email normalization.
//!
//! This library provides shared modules for the two binaries:
//! - `inbound-web`: Thin web server for receiving Mandrill webhooks
//! - `inbound-processor`: Processor that normalizes queued webhook payloads
//!
//! ## Architecture
//!
//! ```text
//! Mandrill → Web Server → inbound_webhooks → Processor → normalized_emails
//! ```

pub mod config;
pub mod process;
pub mod queue;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use process::{process_webhook, FsTempStorage, ProcessError, TempStorage};
pub use queue::{
    InboundWebhook, MandrillRawPayload, NormalizedEmail, Publisher, INBOUND_QUEUE,
    NORMALIZED_QUEUE,
};
pub use web::AppState;
