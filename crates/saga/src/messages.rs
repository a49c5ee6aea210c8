//! Payloads exchanged with downstream services over the bus.

use common::{CorrelationId, OrderId, ReferenceId, UserId};
use order_store::{Order, OrderStatus, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order reference carried inside saga messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRef {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<ReferenceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl OrderRef {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            reference_id: None,
            user_id: None,
        }
    }
}

impl From<&Order> for OrderRef {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id,
            reference_id: Some(order.reference_id.clone()),
            user_id: Some(order.user_id.clone()),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Status verdict or rollback request for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_status: Option<OrderStatus>,
    pub order: OrderRef,
    /// `false` signals a failure that must be compensated.
    #[serde(default = "default_true")]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl SagaMessage {
    pub fn status_update(order_id: OrderId, status: OrderStatus) -> Self {
        Self {
            process_status: Some(status),
            order: OrderRef::new(order_id),
            status: true,
            correlation_id: None,
        }
    }

    pub fn rollback(order_id: OrderId) -> Self {
        Self {
            process_status: None,
            order: OrderRef::new(order_id),
            status: false,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Published to the warehouse and delivery decline queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineEvent {
    pub order: OrderRef,
    pub correlation_id: CorrelationId,
}

/// Optional delivery metadata supplied when the order is created.
///
/// Pickup-point and courier selections are forwarded to delivery as the
/// caller sent them, objects included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postamat: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdek: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commentary: Option<String>,
}

/// Hand-off of an order to the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAction {
    pub order_id: OrderId,
    pub reference_id: ReferenceId,
    #[serde(flatten)]
    pub details: DeliveryDetails,
    pub correlation_id: CorrelationId,
}

/// Subscription activation toggle sent by the billing side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionActionEvent {
    pub user_id: UserId,
    pub action: SubscriptionStatus,
}
