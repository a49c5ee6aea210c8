use common::{OrderId, ReferenceId, UserId};
use thiserror::Error;

use crate::status::{OrderStatus, ParseStatusError};

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// The `(user_id, reference_id)` pair is already used by another order.
    #[error("Order with reference {reference_id} already exists for user {user_id}")]
    Conflict {
        user_id: UserId,
        reference_id: ReferenceId,
    },

    /// The user already holds a live subscription.
    #[error("User {0} already has a subscription")]
    SubscriptionExists(UserId),

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The user has no live subscription.
    #[error("Subscription not found for user {0}")]
    SubscriptionNotFound(UserId),

    /// The requested status change is not allowed by the order state machine.
    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// A stored value could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(#[from] ParseStatusError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderStoreError {
    /// Returns true for infrastructure failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrderStoreError::Database(_))
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
