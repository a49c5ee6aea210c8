//! Long-lived consumer loop.
//!
//! One loop per queue. Each delivery is handled in its own task and the loop
//! waits for it before settling the delivery and receiving the next one, so
//! messages are processed in receive order and a panicking handler cannot
//! take the loop down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Delivery, Message, MessageBus, Result};

/// Failure reported by a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub message: String,
    /// Retryable failures are redelivered until the redelivery limit.
    pub retryable: bool,
}

impl HandlerFailure {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Processes messages from one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerFailure>;
}

/// Subscribes to `queue` and spawns its consumer loop.
///
/// The loop ends when `shutdown` flips to `true` (or its sender is dropped)
/// or when the bus closes the subscription. The delivery being processed
/// when shutdown arrives is finished and settled first.
pub async fn spawn_consumer<B, H>(
    bus: Arc<B>,
    queue: &str,
    handler: Arc<H>,
    max_redeliveries: u32,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>>
where
    B: MessageBus + ?Sized + 'static,
    H: MessageHandler,
{
    let mut subscription = bus.subscribe(queue).await?;
    let queue = queue.to_string();

    let handle = tokio::spawn(async move {
        tracing::info!(queue = %queue, "Consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                delivery = subscription.next() => match delivery {
                    Some(delivery) => {
                        process(&queue, delivery, handler.clone(), max_redeliveries).await;
                    }
                    None => {
                        tracing::info!(queue = %queue, "Subscription closed");
                        break;
                    }
                },
            }
        }
        tracing::info!(queue = %queue, "Consumer stopped");
    });

    Ok(handle)
}

async fn process<H: MessageHandler>(
    queue: &str,
    delivery: Delivery,
    handler: Arc<H>,
    max_redeliveries: u32,
) {
    let message = delivery.message().clone();
    let message_id = message.id;
    let correlation_id = message
        .correlation_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    let delivery_count = message.delivery_count;

    let outcome = tokio::spawn(async move { handler.handle(&message).await }).await;

    let settled = match outcome {
        Ok(Ok(())) => {
            metrics::counter!("bus_messages_consumed_total", "queue" => queue.to_string())
                .increment(1);
            delivery.ack().await
        }
        Ok(Err(failure)) => {
            metrics::counter!("bus_handler_failures_total", "queue" => queue.to_string())
                .increment(1);
            if failure.retryable && delivery_count <= max_redeliveries {
                tracing::warn!(
                    queue,
                    %message_id,
                    correlation_id = %correlation_id,
                    delivery_count,
                    error = %failure,
                    "Handler failed, requeueing"
                );
                delivery.nack(true).await
            } else {
                tracing::error!(
                    queue,
                    %message_id,
                    correlation_id = %correlation_id,
                    delivery_count,
                    retryable = failure.retryable,
                    error = %failure,
                    "Handler failed, dropping message"
                );
                delivery.ack().await
            }
        }
        Err(join_error) => {
            metrics::counter!("bus_handler_failures_total", "queue" => queue.to_string())
                .increment(1);
            tracing::error!(
                queue,
                %message_id,
                correlation_id = %correlation_id,
                error = %join_error,
                "Handler panicked, dead-lettering message"
            );
            delivery.nack(false).await
        }
    };

    if let Err(err) = settled {
        tracing::warn!(queue, %message_id, error = %err, "Failed to settle delivery");
    }
}
