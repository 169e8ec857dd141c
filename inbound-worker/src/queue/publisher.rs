//! RabbitMQ publisher shared by the web server and the processor.
//!
//! One AMQP connection is opened lazily and reused by every clone. A dropped
//! connection is replaced on the next publish.

use std::sync::Arc;

use anyhow::{Context, Result};
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::types::{InboundWebhook, NormalizedEmail, INBOUND_QUEUE, NORMALIZED_QUEUE};
use crate::process;

/// Cloneable handle publishing JSON messages to the pipeline queues.
#[derive(Clone)]
pub struct Publisher {
    url: Arc<str>,
    link: Arc<RwLock<Option<Link>>>,
}

/// Open connection and the channel publishes go through.
struct Link {
    connection: Connection,
    channel: Channel,
}

impl Link {
    fn usable(&self) -> Option<Channel> {
        self.channel
            .status()
            .connected()
            .then(|| self.channel.clone())
    }
}

impl Publisher {
    pub fn new(url: String) -> Self {
        Self {
            url: url.into(),
            link: Arc::new(RwLock::new(None)),
        }
    }

    /// Channel of the current link, reconnecting when it is gone.
    async fn channel(&self) -> Result<Channel> {
        if let Some(channel) = self.link.read().await.as_ref().and_then(Link::usable) {
            return Ok(channel);
        }

        let mut link = self.link.write().await;
        // Another task may have reconnected while we waited
        if let Some(channel) = link.as_ref().and_then(Link::usable) {
            return Ok(channel);
        }

        info!("rabbitmq_publisher_connecting");
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to create channel")?;

        for queue in [INBOUND_QUEUE, NORMALIZED_QUEUE] {
            declare_queue(&channel, queue).await?;
        }
        info!("rabbitmq_publisher_connected");

        *link = Some(Link {
            connection,
            channel: channel.clone(),
        });
        Ok(channel)
    }

    /// Publish a raw inbound webhook to the inbound_webhooks queue.
    pub async fn publish_inbound(&self, webhook: &InboundWebhook) -> Result<()> {
        let body = serde_json::to_vec(webhook).context("Failed to serialize webhook")?;
        self.publish(INBOUND_QUEUE, &body, inbound_message_id(webhook))
            .await
    }

    /// Publish a normalized email to the normalized_emails queue.
    pub async fn publish_normalized(&self, email: &NormalizedEmail) -> Result<()> {
        let body = serde_json::to_vec(email).context("Failed to serialize normalized email")?;
        self.publish(NORMALIZED_QUEUE, &body, process::message_id(email))
            .await
    }

    /// Publish a persistent JSON message and wait for the broker confirm.
    async fn publish(&self, queue: &str, body: &[u8], message_id: String) -> Result<()> {
        let channel = self.channel().await?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .with_context(|| format!("Failed to publish to {}", queue))?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = queue,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    /// Close the channel and connection, if open.
    pub async fn close(&self) {
        let Some(Link {
            connection,
            channel,
        }) = self.link.write().await.take()
        else {
            return;
        };

        if let Err(e) = channel.close(200, "shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }
        if let Err(e) = connection.close(200, "shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!("rabbitmq_publisher_closed");
    }
}

/// Declare a durable queue. Idempotent.
pub async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue {}", queue))?;
    Ok(())
}

/// Tracking id for a raw webhook: provider name plus a short payload digest.
fn inbound_message_id(webhook: &InboundWebhook) -> String {
    match webhook {
        InboundWebhook::Mandrill(p) => {
            let digest = Sha256::digest(p.mandrill_events.as_bytes());
            format!("mandrill-{}", &hex::encode(digest)[..16])
        }
    }
}
