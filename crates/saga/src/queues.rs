//! Queue names used by the order saga.

pub const ORDER_STATUS_QUEUE: &str = "ORDER_STATUS_QUEUE";
pub const ORDER_DECLINE_QUEUE: &str = "ORDER_DECLINE_QUEUE";
pub const WAREHOUSE_DECLINE_QUEUE: &str = "WAREHOUSE_DECLINE_QUEUE";
pub const DELIVERY_DECLINE_QUEUE: &str = "DELIVERY_DECLINE_QUEUE";
pub const DELIVERY_ORDER_ACTION_QUEUE: &str = "DELIVERY_ORDER_ACTION_QUEUE";
pub const SUBSCRIPTION_ACTION_QUEUE: &str = "SUBSCRIPTION_ACTION_QUEUE";

/// Resolved queue names; every name can be overridden by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Consumed: downstream status verdicts.
    pub order_status: String,
    /// Consumed: rollback requests.
    pub order_decline: String,
    /// Produced: undo a warehouse reservation.
    pub warehouse_decline: String,
    /// Produced: undo a delivery reservation.
    pub delivery_decline: String,
    /// Produced: hand the order off to delivery.
    pub delivery_order_action: String,
    /// Consumed: subscription activation toggles.
    pub subscription_action: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            order_status: ORDER_STATUS_QUEUE.to_string(),
            order_decline: ORDER_DECLINE_QUEUE.to_string(),
            warehouse_decline: WAREHOUSE_DECLINE_QUEUE.to_string(),
            delivery_decline: DELIVERY_DECLINE_QUEUE.to_string(),
            delivery_order_action: DELIVERY_ORDER_ACTION_QUEUE.to_string(),
            subscription_action: SUBSCRIPTION_ACTION_QUEUE.to_string(),
        }
    }
}
