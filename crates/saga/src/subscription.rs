//! Subscription saga: a recurring order backed by a subscription row.

use std::sync::Arc;

use common::{ReferenceId, UserId};
use message_bus::MessageBus;
use order_store::{
    NewSubscription, OrderStore, Subscription, SubscriptionLevel, SubscriptionStore,
    SubscriptionToggle,
};

use crate::error::{Result, SagaError};
use crate::gateways::{PaymentGateway, WarehouseGateway};
use crate::messages::SubscriptionActionEvent;
use crate::orchestrator::{SagaOrchestrator, require_user};

/// Creates, deletes and toggles subscriptions.
///
/// Creation reuses the orchestrator's `start` to create the backing order.
pub struct SubscriptionManager<S, B, W, P>
where
    S: OrderStore + SubscriptionStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    orchestrator: Arc<SagaOrchestrator<S, B, W, P>>,
}

impl<S, B, W, P> SubscriptionManager<S, B, W, P>
where
    S: OrderStore + SubscriptionStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<S, B, W, P>>) -> Self {
        Self { orchestrator }
    }

    fn store(&self) -> &S {
        self.orchestrator.store()
    }

    /// Creates a subscription and its backing order.
    ///
    /// Fails with `Conflict` if the user already holds a live subscription.
    /// If the subscription row cannot be written the backing order is
    /// marked `FAILED`.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        user_id: &UserId,
        reference_id: &ReferenceId,
        level: Option<SubscriptionLevel>,
    ) -> Result<Subscription> {
        require_user(user_id)?;
        if reference_id.is_blank() {
            return Err(SagaError::InvalidInput("referenceId is required".to_string()));
        }
        let level =
            level.ok_or_else(|| SagaError::Unprocessable("level is required".to_string()))?;

        if self.store().get_subscription_status(user_id).await?.is_some() {
            return Err(SagaError::Conflict(format!(
                "user {user_id} already has a subscription"
            )));
        }

        let order = self.orchestrator.start(user_id, reference_id).await?;
        let input = NewSubscription {
            user_id: user_id.clone(),
            order_id: order.order_id,
            level,
        };

        match self.store().create_subscription(input).await {
            Ok(subscription) => {
                tracing::info!(
                    subscription_id = %subscription.subscription_id,
                    order_id = %order.order_id,
                    %level,
                    "subscription created"
                );
                Ok(subscription)
            }
            Err(err) => {
                self.orchestrator.mark_failed(order.order_id).await;
                Err(err.into())
            }
        }
    }

    /// Tombstones the user's live subscription.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, user_id: &UserId) -> Result<Subscription> {
        require_user(user_id)?;
        let deleted = self
            .store()
            .delete_subscription(user_id)
            .await?
            .ok_or_else(|| {
                SagaError::Unprocessable(format!("user {user_id} has no subscription"))
            })?;

        tracing::info!(subscription_id = %deleted.subscription_id, "subscription deleted");
        Ok(deleted)
    }

    /// Returns the user's live subscription.
    pub async fn status(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        require_user(user_id)?;
        Ok(self.store().get_subscription_status(user_id).await?)
    }

    /// Returns all of the user's subscriptions, deleted ones included.
    pub async fn list(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        require_user(user_id)?;
        Ok(self.store().list_subscriptions(user_id).await?)
    }

    /// Applies an activation toggle received from the bus.
    #[tracing::instrument(skip(self, event), fields(user_id = %event.user_id, action = %event.action))]
    pub async fn on_action_event(
        &self,
        event: &SubscriptionActionEvent,
    ) -> Result<SubscriptionToggle> {
        require_user(&event.user_id)?;
        let toggle = self
            .store()
            .set_subscription_status(&event.user_id, event.action)
            .await?;

        match toggle {
            SubscriptionToggle::Applied { from } => {
                tracing::info!(%from, "subscription status changed");
            }
            SubscriptionToggle::Unchanged => {
                tracing::debug!("subscription status unchanged");
            }
        }
        Ok(toggle)
    }
}
