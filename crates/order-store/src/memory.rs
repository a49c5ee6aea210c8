use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, ReferenceId, UserId};
use tokio::sync::RwLock;

use crate::{
    Order, OrderStatus, OrderStoreError, Reservation, Result, SagaStep, StatusChange, StepRecord,
    store::{OrderStore, SubscriptionStore, plan_status_change},
    subscription::{NewSubscription, Subscription, SubscriptionStatus, SubscriptionToggle},
};

/// In-memory order store implementation for testing.
///
/// This implementation keeps all rows in memory and provides
/// the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Clears all orders and subscriptions.
    pub async fn clear(&self) {
        self.orders.write().await.clear();
        self.subscriptions.write().await.clear();
    }

    async fn apply_status(
        &self,
        order_id: OrderId,
        user_id: Option<&UserId>,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .filter(|order| user_id.is_none_or(|user_id| order.user_id == *user_id))
            .ok_or(OrderStoreError::OrderNotFound(order_id))?;

        let change = plan_status_change(order_id, order.status, status)?;
        if change.is_modified() {
            order.status = status;
            order.updated_at = Utc::now();
            if matches!(change, StatusChange::Overridden { .. }) {
                order.status_overridden = true;
            }
        }
        Ok(change)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, user_id: &UserId, reference_id: &ReferenceId) -> Result<Order> {
        let mut orders = self.orders.write().await;

        // Unique (user_id, reference_id) constraint simulation
        if orders
            .values()
            .any(|o| o.user_id == *user_id && o.reference_id == *reference_id)
        {
            return Err(OrderStoreError::Conflict {
                user_id: user_id.clone(),
                reference_id: reference_id.clone(),
            });
        }

        let order = Order::new(user_id.clone(), reference_id.clone());
        orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        self.apply_status(order_id, Some(user_id), status).await
    }

    async fn update_status_by_order(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        self.apply_status(order_id, None, status).await
    }

    async fn get_order(&self, order_id: OrderId, user_id: &UserId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .get(&order_id)
            .filter(|o| o.user_id == *user_id)
            .cloned())
    }

    async fn get_order_by_reference(
        &self,
        reference_id: &ReferenceId,
        user_id: &UserId,
    ) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|o| o.user_id == *user_id && o.reference_id == *reference_id)
            .cloned())
    }

    async fn get_order_by_id(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn list_orders(
        &self,
        user_id: &UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut result: Vec<_> = orders
            .values()
            .filter(|o| o.user_id == *user_id)
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn attach_reservation(&self, order_id: OrderId, reservation: Reservation) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::OrderNotFound(order_id))?;
        order.apply_reservation(reservation);
        Ok(())
    }

    async fn record_step(&self, order_id: OrderId, step: SagaStep) -> Result<StepRecord> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::OrderNotFound(order_id))?;

        let compensated = order.is_compensated();
        let marker = order.step_marker(step);
        if marker.is_some() {
            return Ok(StepRecord::AlreadyRecorded);
        }
        *marker = Some(Utc::now());

        if compensated && step != SagaStep::Compensated {
            Ok(StepRecord::RecordedAfterCompensation)
        } else {
            Ok(StepRecord::Recorded)
        }
    }

    async fn claim_compensation(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::OrderNotFound(order_id))?;

        if order.is_compensated() {
            return Ok(None);
        }
        order.compensated_at = Some(Utc::now());
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryOrderStore {
    async fn create_subscription(&self, input: NewSubscription) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;

        if subscriptions
            .iter()
            .any(|s| s.user_id == input.user_id && s.is_live())
        {
            return Err(OrderStoreError::SubscriptionExists(input.user_id));
        }

        let subscription = Subscription::new(input);
        subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription_status(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .iter()
            .find(|s| s.user_id == *user_id && s.is_live())
            .cloned())
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut result: Vec<_> = subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn delete_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let mut subscriptions = self.subscriptions.write().await;
        let Some(subscription) = subscriptions
            .iter_mut()
            .find(|s| s.user_id == *user_id && s.is_live())
        else {
            return Ok(None);
        };

        let now = Utc::now();
        subscription.deleted_at = Some(now);
        subscription.status = SubscriptionStatus::Deactivated;
        subscription.updated_at = now;
        Ok(Some(subscription.clone()))
    }

    async fn set_subscription_status(
        &self,
        user_id: &UserId,
        status: SubscriptionStatus,
    ) -> Result<SubscriptionToggle> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .iter_mut()
            .find(|s| s.user_id == *user_id && s.is_live())
            .ok_or_else(|| OrderStoreError::SubscriptionNotFound(user_id.clone()))?;

        if subscription.status == status {
            return Ok(SubscriptionToggle::Unchanged);
        }

        let from = subscription.status;
        subscription.status = status;
        subscription.updated_at = Utc::now();
        Ok(SubscriptionToggle::Applied { from })
    }
}
