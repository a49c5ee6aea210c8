use async_trait::async_trait;
use common::CorrelationId;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Delivery, Message, Result};

/// Durable-queue message bus.
///
/// Publishing is fire-and-forget from the caller's point of view: a
/// successful `publish` means the broker accepted the message. Each queue
/// has at most one consumer; deliveries must be settled through
/// [`Delivery::ack`] or [`Delivery::nack`].
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: Message) -> Result<()>;

    /// Starts consuming a queue. Messages left unsettled by a previous
    /// consumer are delivered again.
    async fn subscribe(&self, queue: &str) -> Result<Subscription>;

    /// Closes the connection. Active subscriptions end.
    async fn close(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Stream of deliveries for one queue.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            receiver,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery. Returns `None` once the bus is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// Convenience helpers available on every bus.
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Serializes `payload` and publishes it, returning the message id.
    async fn publish_json<T>(
        &self,
        queue: &str,
        payload: &T,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Uuid>
    where
        T: Serialize + Sync,
    {
        let message = Message::from_payload(queue, payload)?.with_correlation_id(correlation_id);
        let id = message.id;
        self.publish(message).await?;
        Ok(id)
    }
}

impl<B: MessageBus + ?Sized> MessageBusExt for B {}
