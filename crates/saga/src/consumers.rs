//! Bus consumers feeding downstream events into the saga.

use std::sync::Arc;

use async_trait::async_trait;
use message_bus::{HandlerFailure, Message, MessageBus, MessageHandler, spawn_consumer};
use order_store::{OrderStore, SubscriptionStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SagaError};
use crate::gateways::{PaymentGateway, WarehouseGateway};
use crate::messages::{SagaMessage, SubscriptionActionEvent};
use crate::orchestrator::SagaOrchestrator;
use crate::subscription::SubscriptionManager;

fn decode<T>(message: &Message) -> std::result::Result<T, HandlerFailure>
where
    T: serde::de::DeserializeOwned,
{
    message
        .decode()
        .map_err(|err| HandlerFailure::permanent(format!("malformed payload: {err}")))
}

/// Applies status verdicts from the order-status queue.
pub struct OrderStatusHandler<S, B, W, P>
where
    S: OrderStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    orchestrator: Arc<SagaOrchestrator<S, B, W, P>>,
}

impl<S, B, W, P> OrderStatusHandler<S, B, W, P>
where
    S: OrderStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<S, B, W, P>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S, B, W, P> MessageHandler for OrderStatusHandler<S, B, W, P>
where
    S: OrderStore + 'static,
    B: MessageBus + 'static,
    W: WarehouseGateway + 'static,
    P: PaymentGateway + 'static,
{
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerFailure> {
        let event: SagaMessage = decode(message)?;
        self.orchestrator.on_status_event(&event).await?;
        Ok(())
    }
}

/// Declines and compensates orders named on the rollback queue.
pub struct RollbackHandler<S, B, W, P>
where
    S: OrderStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    orchestrator: Arc<SagaOrchestrator<S, B, W, P>>,
}

impl<S, B, W, P> RollbackHandler<S, B, W, P>
where
    S: OrderStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<S, B, W, P>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S, B, W, P> MessageHandler for RollbackHandler<S, B, W, P>
where
    S: OrderStore + 'static,
    B: MessageBus + 'static,
    W: WarehouseGateway + 'static,
    P: PaymentGateway + 'static,
{
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerFailure> {
        let event: SagaMessage = decode(message)?;
        self.orchestrator.on_rollback_event(&event).await?;
        Ok(())
    }
}

/// Applies subscription activation toggles.
pub struct SubscriptionActionHandler<S, B, W, P>
where
    S: OrderStore + SubscriptionStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    manager: Arc<SubscriptionManager<S, B, W, P>>,
}

impl<S, B, W, P> SubscriptionActionHandler<S, B, W, P>
where
    S: OrderStore + SubscriptionStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    pub fn new(manager: Arc<SubscriptionManager<S, B, W, P>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<S, B, W, P> MessageHandler for SubscriptionActionHandler<S, B, W, P>
where
    S: OrderStore + SubscriptionStore + 'static,
    B: MessageBus + 'static,
    W: WarehouseGateway + 'static,
    P: PaymentGateway + 'static,
{
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerFailure> {
        let event: SubscriptionActionEvent = decode(message)?;
        self.manager.on_action_event(&event).await?;
        Ok(())
    }
}

/// Starts the order-status, rollback and subscription-action consumers.
///
/// All loops stop when `shutdown` flips to `true` or the bus closes.
pub async fn spawn_saga_consumers<S, B, W, P>(
    orchestrator: Arc<SagaOrchestrator<S, B, W, P>>,
    subscriptions: Arc<SubscriptionManager<S, B, W, P>>,
    max_redeliveries: u32,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>>
where
    S: OrderStore + SubscriptionStore + 'static,
    B: MessageBus + 'static,
    W: WarehouseGateway + 'static,
    P: PaymentGateway + 'static,
{
    let bus = orchestrator.bus().clone();
    let queues = orchestrator.config().queues.clone();

    let status = spawn_consumer(
        bus.clone(),
        &queues.order_status,
        Arc::new(OrderStatusHandler::new(orchestrator.clone())),
        max_redeliveries,
        shutdown.clone(),
    )
    .await
    .map_err(SagaError::from)?;

    let rollback = spawn_consumer(
        bus.clone(),
        &queues.order_decline,
        Arc::new(RollbackHandler::new(orchestrator)),
        max_redeliveries,
        shutdown.clone(),
    )
    .await
    .map_err(SagaError::from)?;

    let subscription = spawn_consumer(
        bus,
        &queues.subscription_action,
        Arc::new(SubscriptionActionHandler::new(subscriptions)),
        max_redeliveries,
        shutdown,
    )
    .await
    .map_err(SagaError::from)?;

    tracing::info!(
        order_status = %queues.order_status,
        order_decline = %queues.order_decline,
        subscription_action = %queues.subscription_action,
        "saga consumers started"
    );
    Ok(vec![status, rollback, subscription])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{InMemoryPaymentGateway, InMemoryWarehouseGateway};
    use crate::orchestrator::SagaConfig;
    use common::OrderId;
    use message_bus::InMemoryMessageBus;
    use serde_json::json;

    #[tokio::test]
    async fn test_malformed_payload_is_permanent_failure() {
        let orchestrator = Arc::new(SagaOrchestrator::new(
            order_store::InMemoryOrderStore::new(),
            Arc::new(InMemoryMessageBus::new()),
            InMemoryWarehouseGateway::new(),
            InMemoryPaymentGateway::new(),
            SagaConfig::default(),
        ));
        let handler = OrderStatusHandler::new(orchestrator);

        let failure = handler
            .handle(&Message::new("q", json!({ "nope": true })))
            .await
            .unwrap_err();
        assert!(!failure.retryable);
        assert!(failure.message.contains("malformed payload"));
    }

    #[tokio::test]
    async fn test_unknown_order_is_permanent_failure() {
        let orchestrator = Arc::new(SagaOrchestrator::new(
            order_store::InMemoryOrderStore::new(),
            Arc::new(InMemoryMessageBus::new()),
            InMemoryWarehouseGateway::new(),
            InMemoryPaymentGateway::new(),
            SagaConfig::default(),
        ));
        let handler = RollbackHandler::new(orchestrator);
        let payload = serde_json::to_value(SagaMessage::rollback(OrderId::new())).unwrap();

        let failure = handler
            .handle(&Message::new("q", payload))
            .await
            .unwrap_err();
        assert!(!failure.retryable);
    }
}
