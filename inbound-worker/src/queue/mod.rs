//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Message types for the two-queue architecture
//! - Async publisher for enqueueing messages
//!
//! ## Architecture
//!
//! ```text
//! Web Server → inbound_webhooks queue → Processor → normalized_emails queue → consumers
//! ```

pub mod publisher;
pub mod types;

pub use publisher::{declare_queue, Publisher};
pub use types::{
    InboundWebhook, MandrillRawPayload, NormalizedEmail, INBOUND_QUEUE, NORMALIZED_QUEUE,
};
