use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::Result;

/// Envelope carried by the bus.
///
/// The payload is kept as raw JSON; consumers decode it into their own
/// message types with [`Message::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
    /// How many times this message has been handed to a consumer.
    #[serde(default)]
    pub delivery_count: u32,
}

impl Message {
    pub fn new(queue: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            correlation_id: None,
            payload,
            published_at: Utc::now(),
            delivery_count: 0,
        }
    }

    /// Serializes `payload` into a new message.
    pub fn from_payload<T: Serialize>(queue: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(queue, serde_json::to_value(payload)?))
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Decodes the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// True if the message was delivered before and not acknowledged.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Settles deliveries on behalf of the bus that produced them.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, message: &Message) -> Result<()>;

    async fn nack(&self, message: &Message, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer, awaiting acknowledgement.
///
/// Settling consumes the delivery, so it can be acked or nacked only once.
pub struct Delivery {
    message: Message,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(message: Message, acker: Arc<dyn Acker>) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack(&self.message).await
    }

    /// Rejects the delivery. With `requeue` the message is delivered again,
    /// otherwise it is dead-lettered.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(&self.message, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
