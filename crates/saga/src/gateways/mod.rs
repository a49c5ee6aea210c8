//! Synchronous gateways to services owned outside this workspace.
//!
//! Delivery is reached only through the bus, so it has no gateway here.

pub mod payment;
pub mod warehouse;

use thiserror::Error;

pub use payment::{InMemoryPaymentGateway, PaymentGateway, UnsupportedPaymentGateway};
pub use warehouse::{BasketCheck, InMemoryWarehouseGateway, WarehouseGateway};

/// Errors returned by gateway implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The service could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service answered and refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The service does not implement the operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),
}
