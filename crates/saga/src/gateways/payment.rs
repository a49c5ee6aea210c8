//! Payment gateway trait and implementations.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::OrderId;
use order_store::Order;

use super::GatewayError;

/// Trait for payment operations used during compensation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Reverses any charge made for the order.
    async fn reverse(&self, order: &Order) -> Result<(), GatewayError>;
}

/// Payment gateway for deployments where reversal is not available yet.
///
/// Every reversal answers `Unsupported`, so compensation reports it as
/// incomplete instead of silently succeeding.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPaymentGateway;

#[async_trait]
impl PaymentGateway for UnsupportedPaymentGateway {
    async fn reverse(&self, _order: &Order) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("payment reversal".to_string()))
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    reversed: Vec<OrderId>,
    fail_on_reverse: bool,
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to fail reversals.
    pub fn set_fail_on_reverse(&self, fail: bool) {
        self.state().fail_on_reverse = fail;
    }

    /// Returns the number of reversals performed.
    pub fn reversal_count(&self) -> usize {
        self.state().reversed.len()
    }

    /// Returns true if the order's payment was reversed.
    pub fn was_reversed(&self, order_id: OrderId) -> bool {
        self.state().reversed.contains(&order_id)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn reverse(&self, order: &Order) -> Result<(), GatewayError> {
        let mut state = self.state();

        if state.fail_on_reverse {
            return Err(GatewayError::Unavailable("payment declined reversal".to_string()));
        }

        state.reversed.push(order.order_id);
        Ok(())
    }
}
