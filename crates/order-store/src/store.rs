use async_trait::async_trait;
use common::{OrderId, ReferenceId, UserId};

use crate::order::{Order, Reservation, SagaStep, StepRecord};
use crate::status::{OrderStatus, StatusChange};
use crate::subscription::{NewSubscription, Subscription, SubscriptionStatus, SubscriptionToggle};
use crate::Result;

/// Core trait for order persistence.
///
/// Every operation is atomic at the single-row level; no operation spans
/// more than one order. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates a new order in `NEW` status.
    ///
    /// Fails with `Conflict` if the user already used `reference_id`.
    async fn create(&self, user_id: &UserId, reference_id: &ReferenceId) -> Result<Order>;

    /// Applies a status to an order owned by `user_id`.
    ///
    /// Re-applying the current status is a successful no-op
    /// (`StatusChange::Unchanged`).
    async fn update_status(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        status: OrderStatus,
    ) -> Result<StatusChange>;

    /// Applies a status knowing only the order ID.
    ///
    /// Used by bus consumers that carry no user context.
    async fn update_status_by_order(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<StatusChange>;

    /// Loads an order scoped to its owner.
    async fn get_order(&self, order_id: OrderId, user_id: &UserId) -> Result<Option<Order>>;

    /// Loads an order by its caller-supplied reference.
    async fn get_order_by_reference(
        &self,
        reference_id: &ReferenceId,
        user_id: &UserId,
    ) -> Result<Option<Order>>;

    /// Loads an order without owner scoping (bus consumers only).
    async fn get_order_by_id(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first, optionally filtered by status.
    async fn list_orders(
        &self,
        user_id: &UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>>;

    /// Stores the totals and items reported by the warehouse.
    async fn attach_reservation(&self, order_id: OrderId, reservation: Reservation) -> Result<()>;

    /// Sets a saga progress marker.
    ///
    /// The marker and the compensation claim are updated atomically with
    /// respect to each other: a marker set after the claim is reported as
    /// [`StepRecord::RecordedAfterCompensation`].
    async fn record_step(&self, order_id: OrderId, step: SagaStep) -> Result<StepRecord>;

    /// Claims compensation for an order.
    ///
    /// Returns the order as it stood when the claim landed, or `None` if
    /// compensation was already claimed. The markers on the returned order
    /// are exactly the steps the claimant must undo.
    async fn claim_compensation(&self, order_id: OrderId) -> Result<Option<Order>>;
}

/// Persistence for subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts a subscription. Fails with `SubscriptionExists` if the user
    /// already holds a live one.
    async fn create_subscription(&self, input: NewSubscription) -> Result<Subscription>;

    /// Returns the user's live subscription, if any.
    async fn get_subscription_status(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Returns every subscription of the user, tombstoned ones included.
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>>;

    /// Tombstones the live subscription. Returns `None` if there was none.
    async fn delete_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Sets the activation status of the live subscription.
    async fn set_subscription_status(
        &self,
        user_id: &UserId,
        status: SubscriptionStatus,
    ) -> Result<SubscriptionToggle>;
}

/// Resolves a requested status against the current one.
///
/// Shared by all implementations so they enforce the same state machine.
pub(crate) fn plan_status_change(
    order_id: OrderId,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<StatusChange> {
    use crate::status::Transition;

    match from.transition_to(to) {
        Transition::Apply => Ok(StatusChange::Applied { from }),
        Transition::Unchanged => Ok(StatusChange::Unchanged),
        Transition::Override => Ok(StatusChange::Overridden { from }),
        Transition::Reject => Err(crate::OrderStoreError::InvalidTransition { order_id, from, to }),
    }
}
