//! Saga error types.

use std::fmt;
use std::time::Duration;

use common::OrderId;
use message_bus::{BusError, HandlerFailure};
use order_store::OrderStoreError;
use serde::Serialize;
use thiserror::Error;

use crate::gateways::GatewayError;

/// Coarse classification of saga failures.
///
/// Callers branch on the kind rather than on individual variants; the HTTP
/// layer maps each kind to one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    Conflict,
    NotFound,
    Unprocessable,
    EmptyBasket,
    ProductUnavailable,
    WarehouseBindFailed,
    UpstreamUnavailable,
    Timeout,
    CompensationIncomplete,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::EmptyBasket => "EmptyBasket",
            ErrorKind::ProductUnavailable => "ProductUnavailable",
            ErrorKind::WarehouseBindFailed => "WarehouseBindFailed",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::CompensationIncomplete => "CompensationIncomplete",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A required identifier or field is missing or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The request collides with existing state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is well-formed but cannot be carried out.
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// The user's basket holds no items.
    #[error("Basket is empty for order {0}")]
    EmptyBasket(OrderId),

    /// Some basket products cannot be reserved.
    #[error("Products unavailable for order {order_id}: {}", products.join(", "))]
    ProductUnavailable {
        order_id: OrderId,
        products: Vec<String>,
    },

    /// The warehouse refused to bind the basket to the order.
    #[error("Warehouse could not bind basket to order {order_id}: {reason}")]
    WarehouseBindFailed { order_id: OrderId, reason: String },

    /// A gateway call failed at the transport level.
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A gateway call did not answer in time.
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A compensating action could not be carried out.
    #[error("Compensation incomplete for order {order_id}: {reason}")]
    CompensationIncomplete { order_id: OrderId, reason: String },

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(#[from] OrderStoreError),

    /// Message bus error.
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::InvalidInput(_) => ErrorKind::InvalidInput,
            SagaError::Conflict(_) => ErrorKind::Conflict,
            SagaError::NotFound(_) => ErrorKind::NotFound,
            SagaError::Unprocessable(_) => ErrorKind::Unprocessable,
            SagaError::EmptyBasket(_) => ErrorKind::EmptyBasket,
            SagaError::ProductUnavailable { .. } => ErrorKind::ProductUnavailable,
            SagaError::WarehouseBindFailed { .. } => ErrorKind::WarehouseBindFailed,
            SagaError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            SagaError::Timeout { .. } => ErrorKind::Timeout,
            SagaError::CompensationIncomplete { .. } => ErrorKind::CompensationIncomplete,
            SagaError::Store(err) => match err {
                OrderStoreError::Conflict { .. }
                | OrderStoreError::SubscriptionExists(_)
                | OrderStoreError::InvalidTransition { .. } => ErrorKind::Conflict,
                OrderStoreError::OrderNotFound(_) | OrderStoreError::SubscriptionNotFound(_) => {
                    ErrorKind::NotFound
                }
                _ => ErrorKind::Internal,
            },
            SagaError::Bus(_) => ErrorKind::UpstreamUnavailable,
            SagaError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::UpstreamUnavailable(_) | SagaError::Timeout { .. } => true,
            SagaError::Bus(err) => !matches!(err, BusError::Closed),
            SagaError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<GatewayError> for SagaError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason) => SagaError::UpstreamUnavailable(reason),
            GatewayError::Rejected(reason) => SagaError::Unprocessable(reason),
            GatewayError::Unsupported(operation) => {
                SagaError::UpstreamUnavailable(format!("{operation} is not supported"))
            }
        }
    }
}

impl From<SagaError> for HandlerFailure {
    fn from(err: SagaError) -> Self {
        if err.is_retryable() {
            HandlerFailure::retryable(err.to_string())
        } else {
            HandlerFailure::permanent(err.to_string())
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
