//! Warehouse gateway trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use order_store::{OrderItem, Reservation};

use super::GatewayError;

/// Result of checking a user's basket before reserving it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasketCheck {
    pub items: Vec<OrderItem>,
    /// Product IDs that cannot be reserved right now.
    pub unavailable: Vec<String>,
}

impl BasketCheck {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_empty()
    }
}

/// Trait for warehouse operations used by the saga.
#[async_trait]
pub trait WarehouseGateway: Send + Sync {
    /// Reports the basket contents and which products are unavailable.
    async fn check_basket(&self, user_id: &UserId) -> Result<BasketCheck, GatewayError>;

    /// Binds the user's basket to the order and returns the reserved lines.
    async fn bind_basket(
        &self,
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<Reservation, GatewayError>;

    /// Returns the lines bound to an order, if the warehouse knows it.
    async fn order_details(&self, order_id: OrderId) -> Result<Option<Reservation>, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryWarehouseState {
    baskets: HashMap<UserId, Vec<OrderItem>>,
    unavailable: HashSet<String>,
    bound: HashMap<OrderId, Reservation>,
    fail_on_check: bool,
    fail_on_bind: bool,
    fail_on_details: bool,
    delay: Option<Duration>,
}

/// In-memory warehouse for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouseGateway {
    state: Arc<Mutex<InMemoryWarehouseState>>,
}

impl InMemoryWarehouseGateway {
    /// Creates a new in-memory warehouse.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryWarehouseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the basket of a user.
    pub fn set_basket(&self, user_id: &UserId, items: Vec<OrderItem>) {
        self.state().baskets.insert(user_id.clone(), items);
    }

    /// Marks a product as out of stock.
    pub fn mark_unavailable(&self, product_id: impl Into<String>) {
        self.state().unavailable.insert(product_id.into());
    }

    /// Configures the service to fail check calls with a transport error.
    pub fn set_fail_on_check(&self, fail: bool) {
        self.state().fail_on_check = fail;
    }

    /// Configures the service to reject bind calls.
    pub fn set_fail_on_bind(&self, fail: bool) {
        self.state().fail_on_bind = fail;
    }

    /// Configures the service to fail detail lookups.
    pub fn set_fail_on_details(&self, fail: bool) {
        self.state().fail_on_details = fail;
    }

    /// Delays every call, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// Returns the number of orders with a bound basket.
    pub fn bound_count(&self) -> usize {
        self.state().bound.len()
    }

    /// Returns true if the order has a bound basket.
    pub fn is_bound(&self, order_id: OrderId) -> bool {
        self.state().bound.contains_key(&order_id)
    }

    async fn pause(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl WarehouseGateway for InMemoryWarehouseGateway {
    async fn check_basket(&self, user_id: &UserId) -> Result<BasketCheck, GatewayError> {
        self.pause().await;
        let state = self.state();

        if state.fail_on_check {
            return Err(GatewayError::Unavailable(
                "warehouse connection refused".to_string(),
            ));
        }

        let items = state.baskets.get(user_id).cloned().unwrap_or_default();
        let unavailable = items
            .iter()
            .filter(|item| state.unavailable.contains(&item.product_id))
            .map(|item| item.product_id.clone())
            .collect();

        Ok(BasketCheck { items, unavailable })
    }

    async fn bind_basket(
        &self,
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<Reservation, GatewayError> {
        self.pause().await;
        let mut state = self.state();

        if state.fail_on_bind {
            return Err(GatewayError::Rejected("basket already bound".to_string()));
        }

        let items = state.baskets.remove(user_id).unwrap_or_default();
        if items.is_empty() {
            return Err(GatewayError::Rejected("basket is empty".to_string()));
        }

        let total_amount = items
            .iter()
            .map(|item| item.price * i64::from(item.quantity))
            .sum();
        let reservation = Reservation::new(total_amount, items);
        state.bound.insert(order_id, reservation.clone());

        Ok(reservation)
    }

    async fn order_details(&self, order_id: OrderId) -> Result<Option<Reservation>, GatewayError> {
        self.pause().await;
        let state = self.state();

        if state.fail_on_details {
            return Err(GatewayError::Unavailable(
                "warehouse connection refused".to_string(),
            ));
        }

        Ok(state.bound.get(&order_id).cloned())
    }
}
