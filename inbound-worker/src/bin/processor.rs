//! Inbound Processor - Mandrill payload normalizer.
//!
//! This binary:
//! 1. Consumes raw webhook payloads from the inbound_webhooks queue
//! 2. Decodes, SPF-filters and normalizes them, writing attachments to disk
//! 3. Publishes one normalized email per accepted message to the
//!    normalized_emails queue
//!
//! This keeps decoding and attachment I/O out of the web server, allowing it
//! to remain extremely fast and responsive.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use inbound::queue::declare_queue;
use inbound::{
    process_webhook, Config, FsTempStorage, InboundWebhook, Publisher, TempStorage,
    INBOUND_QUEUE, NORMALIZED_QUEUE,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("processor_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        concurrency = config.worker_concurrency,
        attachment_dir = %config.attachment_dir().display(),
        "config_loaded"
    );

    // Run the processor
    run(config).await?;

    Ok(())
}

/// Run the processor.
async fn run(config: Config) -> Result<()> {
    let storage: Arc<dyn TempStorage> = Arc::new(FsTempStorage::new(config.attachment_dir()));

    // Connect to RabbitMQ for consuming
    info!(url_length = config.cloudamqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.cloudamqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn
        .create_channel()
        .await
        .context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    // Prefetch bounds how many deliveries are in flight at once
    let prefetch_count = config.worker_concurrency.min(u16::MAX as usize) as u16;
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    for queue in [INBOUND_QUEUE, NORMALIZED_QUEUE] {
        declare_queue(&channel, queue).await?;
    }

    info!(
        inbound_queue = INBOUND_QUEUE,
        normalized_queue = NORMALIZED_QUEUE,
        "rabbitmq_queues_declared"
    );

    // Publisher for the output queue
    let publisher = Arc::new(Publisher::new(config.cloudamqp_url.clone()));

    let mut consumer = channel
        .basic_consume(
            INBOUND_QUEUE,
            "inbound-processor",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = INBOUND_QUEUE, "rabbitmq_consumer_started");
    info!("processor_ready");

    let channel = Arc::new(channel);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("processor_stopping");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let publisher = Arc::clone(&publisher);
                        let channel = Arc::clone(&channel);
                        let storage = Arc::clone(&storage);

                        tokio::spawn(async move {
                            handle_delivery(delivery, &channel, &publisher, storage).await;
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
        }
    }

    publisher.close().await;

    info!("processor_shutdown_complete");
    Ok(())
}

/// Normalize one queued webhook and publish the results.
///
/// Malformed payloads are dropped (nack without requeue); publish failures
/// are requeued.
async fn handle_delivery(
    delivery: Delivery,
    channel: &Channel,
    publisher: &Publisher,
    storage: Arc<dyn TempStorage>,
) {
    let delivery_tag = delivery.delivery_tag;
    let message_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        queue = INBOUND_QUEUE,
        message_id = %message_id,
        delivery_tag = delivery_tag,
        body_length = delivery.data.len(),
        "rabbitmq_webhook_received"
    );

    let webhook: InboundWebhook = match serde_json::from_slice(&delivery.data) {
        Ok(webhook) => webhook,
        Err(e) => {
            error!(
                message_id = %message_id,
                error = %e,
                body_preview = %String::from_utf8_lossy(
                    &delivery.data[..delivery.data.len().min(500)]
                ),
                "webhook_parse_failed"
            );
            nack(channel, delivery_tag, false).await;
            return;
        }
    };

    // Attachment writes are blocking file I/O
    let processed =
        tokio::task::spawn_blocking(move || process_webhook(webhook, storage.as_ref())).await;

    let emails = match processed {
        Ok(Ok(emails)) => emails,
        Ok(Err(e)) => {
            error!(message_id = %message_id, error = %e, "webhook_process_failed");
            nack(channel, delivery_tag, false).await;
            return;
        }
        Err(e) => {
            error!(message_id = %message_id, error = %e, "webhook_process_panicked");
            nack(channel, delivery_tag, false).await;
            return;
        }
    };

    for email in &emails {
        if let Err(e) = publisher.publish_normalized(email).await {
            error!(message_id = %message_id, error = %e, "rabbitmq_publish_failed");
            nack(channel, delivery_tag, true).await;
            return;
        }
    }

    if let Err(e) = channel
        .basic_ack(delivery_tag, BasicAckOptions::default())
        .await
    {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_ack_failed");
    } else {
        info!(
            message_id = %message_id,
            email_count = emails.len(),
            "webhook_processed"
        );
    }
}

async fn nack(channel: &Channel, delivery_tag: u64, requeue: bool) {
    if let Err(e) = channel
        .basic_nack(
            delivery_tag,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
    {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_nack_failed");
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
