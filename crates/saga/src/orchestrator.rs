//! Saga orchestrator for the order lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{CorrelationId, OrderId, ReferenceId, UserId};
use futures_util::future::join_all;
use message_bus::{MessageBus, MessageBusExt};
use order_store::{
    Order, OrderStatus, OrderStore, OrderStoreError, SagaStep, StatusChange, StepRecord,
};

use crate::compensation::{CompensationAction, CompensationReport};
use crate::error::{ErrorKind, Result, SagaError};
use crate::gateways::{GatewayError, PaymentGateway, WarehouseGateway};
use crate::messages::{DeclineEvent, DeliveryAction, DeliveryDetails, OrderRef, SagaMessage};
use crate::queues::QueueNames;

/// Default bound for a single gateway call.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub queues: QueueNames,
    pub gateway_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            queues: QueueNames::default(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }
}

/// Drives orders through reservation, dispatch and confirmation.
///
/// Steps run in this order:
/// 1. `start` creates the order row (`NEW`)
/// 2. `reserve` checks and binds the basket with the warehouse (`RESERVED`)
/// 3. `dispatch` hands the order off to delivery (`CONFIRMING`)
/// 4. downstream verdicts arrive through `on_status_event` (`COMPLETED`)
///
/// Any failure marks the order `FAILED` or `DECLINED` and runs compensation,
/// which only undoes the steps the order's progress markers say happened.
pub struct SagaOrchestrator<S, B, W, P>
where
    S: OrderStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    store: S,
    bus: Arc<B>,
    warehouse: W,
    payment: P,
    config: SagaConfig,
}

impl<S, B, W, P> SagaOrchestrator<S, B, W, P>
where
    S: OrderStore,
    B: MessageBus,
    W: WarehouseGateway,
    P: PaymentGateway,
{
    /// Creates a new orchestrator.
    pub fn new(store: S, bus: Arc<B>, warehouse: W, payment: P, config: SagaConfig) -> Self {
        Self {
            store,
            bus,
            warehouse,
            payment,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Creates the order row in `NEW` status.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, user_id: &UserId, reference_id: &ReferenceId) -> Result<Order> {
        require_user(user_id)?;
        if reference_id.is_blank() {
            return Err(SagaError::InvalidInput("referenceId is required".to_string()));
        }

        let order = self.store.create(user_id, reference_id).await?;

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(order_id = %order.order_id, "saga started");
        Ok(order)
    }

    /// Reserves the user's basket for the order.
    ///
    /// On failure the order ends `FAILED` and compensation runs before the
    /// error is returned.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn reserve(&self, order: &Order) -> Result<Order> {
        let correlation_id = CorrelationId::new();
        match self.try_reserve(order, correlation_id).await {
            Ok(order) => Ok(order),
            Err(err) => {
                self.abort(order.order_id, OrderStatus::Failed, correlation_id, &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn try_reserve(&self, order: &Order, correlation_id: CorrelationId) -> Result<Order> {
        let order_id = order.order_id;
        self.apply_status(order_id, OrderStatus::Reserving, correlation_id)
            .await?;

        let check = self
            .call_gateway("check_basket", self.warehouse.check_basket(&order.user_id))
            .await??;
        if check.is_empty() {
            return Err(SagaError::EmptyBasket(order_id));
        }
        if !check.is_available() {
            return Err(SagaError::ProductUnavailable {
                order_id,
                products: check.unavailable,
            });
        }

        let reservation = self
            .call_gateway(
                "bind_basket",
                self.warehouse.bind_basket(&order.user_id, order_id),
            )
            .await?
            .map_err(|err| match err {
                GatewayError::Unavailable(reason) => SagaError::UpstreamUnavailable(reason),
                other => SagaError::WarehouseBindFailed {
                    order_id,
                    reason: other.to_string(),
                },
            })?;

        if self.store.record_step(order_id, SagaStep::Reserved).await?
            == StepRecord::RecordedAfterCompensation
        {
            self.undo_late_step(order_id, SagaStep::Reserved, correlation_id)
                .await?;
            return Err(SagaError::Unprocessable(format!(
                "order {order_id} was cancelled during reservation"
            )));
        }
        let total_amount = reservation.total_amount;
        self.store.attach_reservation(order_id, reservation).await?;
        self.apply_status(order_id, OrderStatus::Reserved, correlation_id)
            .await?;

        tracing::info!(%correlation_id, total_amount, "basket reserved");
        self.load(order_id).await
    }

    /// Hands a reserved order off to delivery.
    ///
    /// A publish failure is a saga failure: the order ends `FAILED` and the
    /// reservation is compensated.
    #[tracing::instrument(skip(self, order, details), fields(order_id = %order.order_id))]
    pub async fn dispatch(&self, order: &Order, details: &DeliveryDetails) -> Result<Order> {
        let order_id = order.order_id;
        let current = self.load(order_id).await?;
        if current.status != OrderStatus::Reserved {
            return Err(SagaError::Unprocessable(format!(
                "order {order_id} is {}, expected RESERVED",
                current.status
            )));
        }

        let correlation_id = CorrelationId::new();
        let action = DeliveryAction {
            order_id,
            reference_id: current.reference_id.clone(),
            details: details.clone(),
            correlation_id,
        };

        if let Err(err) = self
            .bus
            .publish_json(
                &self.config.queues.delivery_order_action,
                &action,
                Some(correlation_id),
            )
            .await
        {
            let err = SagaError::from(err);
            self.abort(order_id, OrderStatus::Failed, correlation_id, &err)
                .await;
            return Err(err);
        }

        if self.store.record_step(order_id, SagaStep::Dispatched).await?
            == StepRecord::RecordedAfterCompensation
        {
            self.undo_late_step(order_id, SagaStep::Dispatched, correlation_id)
                .await?;
            return Err(SagaError::Unprocessable(format!(
                "order {order_id} was cancelled during dispatch"
            )));
        }
        match self
            .apply_status(order_id, OrderStatus::Confirming, correlation_id)
            .await
        {
            Ok(_) => {}
            // a verdict may already have arrived for the order
            Err(SagaError::Store(OrderStoreError::InvalidTransition { from, .. })) => {
                tracing::debug!(%from, "order moved on before dispatch completed");
            }
            Err(err) => return Err(err),
        }

        tracing::info!(%correlation_id, "order dispatched to delivery");
        self.load(order_id).await
    }

    /// Runs the request-driven saga: `start`, `reserve`, then `dispatch`.
    #[tracing::instrument(skip(self, details))]
    pub async fn create_order(
        &self,
        user_id: &UserId,
        reference_id: &ReferenceId,
        details: &DeliveryDetails,
    ) -> Result<Order> {
        let saga_start = Instant::now();

        let result = async {
            let order = self.start(user_id, reference_id).await?;
            let order = self.reserve(&order).await?;
            self.dispatch(&order, details).await
        }
        .await;

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        result
    }

    /// Cancels an order on behalf of its owner and compensates it.
    #[tracing::instrument(skip(self))]
    pub async fn decline_order(&self, user_id: &UserId, order_id: OrderId) -> Result<Order> {
        require_user(user_id)?;
        if self.store.get_order(order_id, user_id).await?.is_none() {
            return Err(SagaError::Unprocessable(format!(
                "order {order_id} cannot be declined"
            )));
        }

        let correlation_id = CorrelationId::new();
        let report = self
            .compensate(order_id, OrderStatus::Declined, correlation_id)
            .await?;
        tracing::info!(
            %correlation_id,
            issued = report.issued.len(),
            "order declined by user"
        );

        self.store
            .get_order(order_id, user_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))
    }

    /// Applies a downstream status verdict.
    ///
    /// Re-applying a verdict is a no-op. A verdict with `status = false` is
    /// a failure: the order is marked failed and compensated.
    #[tracing::instrument(skip(self, message), fields(order_id = %message.order.order_id))]
    pub async fn on_status_event(&self, message: &SagaMessage) -> Result<StatusChange> {
        let status = message
            .process_status
            .ok_or_else(|| SagaError::InvalidInput("processStatus is required".to_string()))?;
        let order_id = message.order.order_id;
        let correlation_id = message.correlation_id.unwrap_or_default();

        let target = if message.status || status.is_failure() {
            status
        } else {
            OrderStatus::Failed
        };
        let change = self.apply_status(order_id, target, correlation_id).await?;

        if !message.status {
            self.compensate(order_id, target, correlation_id).await?;
        }
        Ok(change)
    }

    /// Handles a rollback request: the order is declined and compensated
    /// whatever the message's `status` flag says.
    #[tracing::instrument(skip(self, message), fields(order_id = %message.order.order_id))]
    pub async fn on_rollback_event(&self, message: &SagaMessage) -> Result<CompensationReport> {
        let correlation_id = message.correlation_id.unwrap_or_default();
        self.compensate(message.order.order_id, OrderStatus::Declined, correlation_id)
            .await
    }

    /// Marks the order with a failure status and issues the owed
    /// compensating actions.
    ///
    /// Compensation is claimed once per order; later calls only apply the
    /// status. Failed actions are logged, counted and returned in the report,
    /// never as an error.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        correlation_id: CorrelationId,
    ) -> Result<CompensationReport> {
        if !status.is_failure() {
            return Err(SagaError::InvalidInput(format!(
                "{status} is not a failure status"
            )));
        }

        self.apply_status(order_id, status, correlation_id).await?;

        let Some(order) = self.store.claim_compensation(order_id).await? else {
            tracing::info!("compensation already claimed, skipping");
            return Ok(CompensationReport::already_compensated(
                order_id,
                correlation_id,
            ));
        };
        metrics::counter!("saga_compensations_total").increment(1);

        let steps: Vec<SagaStep> = [SagaStep::Reserved, SagaStep::Dispatched]
            .into_iter()
            .filter(|step| order.has_step(*step))
            .collect();
        Ok(self.undo_steps(&order, &steps, correlation_id).await)
    }

    /// Undoes a step whose marker landed after compensation was claimed.
    async fn undo_late_step(
        &self,
        order_id: OrderId,
        step: SagaStep,
        correlation_id: CorrelationId,
    ) -> Result<CompensationReport> {
        tracing::warn!(
            %order_id,
            %correlation_id,
            ?step,
            "step finished after compensation was claimed, undoing it"
        );
        let order = self.load(order_id).await?;
        Ok(self.undo_steps(&order, &[step], correlation_id).await)
    }

    /// Issues the compensating actions for `steps`, in step order.
    async fn undo_steps(
        &self,
        order: &Order,
        steps: &[SagaStep],
        correlation_id: CorrelationId,
    ) -> CompensationReport {
        let event = DeclineEvent {
            order: OrderRef::from(order),
            correlation_id,
        };
        let mut report = CompensationReport::new(order.order_id, correlation_id);

        for step in steps {
            match step {
                SagaStep::Reserved => {
                    self.publish_compensation(
                        &mut report,
                        CompensationAction::WarehouseDecline,
                        &self.config.queues.warehouse_decline,
                        &event,
                    )
                    .await;
                }
                SagaStep::Dispatched => {
                    self.publish_compensation(
                        &mut report,
                        CompensationAction::DeliveryDecline,
                        &self.config.queues.delivery_decline,
                        &event,
                    )
                    .await;
                    self.reverse_payment(&mut report, order).await;
                }
                SagaStep::Compensated => {}
            }
        }

        for failure in &report.failures {
            metrics::counter!(
                "saga_compensation_incomplete_total",
                "action" => failure.action.as_str()
            )
            .increment(1);
            tracing::error!(
                order_id = %order.order_id,
                %correlation_id,
                error_kind = %ErrorKind::CompensationIncomplete,
                action = %failure.action,
                reason = %failure.reason,
                "compensating action failed"
            );
        }

        tracing::info!(
            order_id = %order.order_id,
            issued = ?report.issued,
            complete = report.is_complete(),
            "compensation finished"
        );
        report
    }

    async fn reverse_payment(&self, report: &mut CompensationReport, order: &Order) {
        match tokio::time::timeout(self.config.gateway_timeout, self.payment.reverse(order)).await
        {
            Ok(Ok(())) => report.record_issued(CompensationAction::PaymentReversal),
            Ok(Err(err)) => {
                report.record_failure(CompensationAction::PaymentReversal, err.to_string())
            }
            Err(_) => report.record_failure(
                CompensationAction::PaymentReversal,
                format!(
                    "timed out after {}ms",
                    self.config.gateway_timeout.as_millis()
                ),
            ),
        }
    }

    /// Loads an order scoped to its owner.
    pub async fn get_order(&self, order_id: OrderId, user_id: &UserId) -> Result<Option<Order>> {
        require_user(user_id)?;
        Ok(self.store.get_order(order_id, user_id).await?)
    }

    /// Loads an order by the caller's reference.
    pub async fn get_order_by_reference(
        &self,
        reference_id: &ReferenceId,
        user_id: &UserId,
    ) -> Result<Option<Order>> {
        require_user(user_id)?;
        if reference_id.is_blank() {
            return Err(SagaError::InvalidInput("referenceId is required".to_string()));
        }
        Ok(self
            .store
            .get_order_by_reference(reference_id, user_id)
            .await?)
    }

    /// Lists a user's orders.
    ///
    /// Orders without stored lines are filled in from the warehouse,
    /// concurrently and each within the gateway timeout. Lookups that fail
    /// leave the stored values in place.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: &UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        require_user(user_id)?;
        let orders = self.store.list_orders(user_id, status).await?;
        Ok(join_all(orders.into_iter().map(|order| self.enrich(order))).await)
    }

    async fn enrich(&self, mut order: Order) -> Order {
        if !order.items.is_empty() {
            return order;
        }

        match tokio::time::timeout(
            self.config.gateway_timeout,
            self.warehouse.order_details(order.order_id),
        )
        .await
        {
            Ok(Ok(Some(reservation))) => order.apply_reservation(reservation),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                tracing::warn!(order_id = %order.order_id, error = %err, "order details lookup failed");
            }
            Err(_) => {
                tracing::warn!(order_id = %order.order_id, "order details lookup timed out");
            }
        }
        order
    }

    /// Marks an order `FAILED` without compensation.
    pub(crate) async fn mark_failed(&self, order_id: OrderId) {
        if let Err(err) = self
            .apply_status(order_id, OrderStatus::Failed, CorrelationId::new())
            .await
        {
            tracing::error!(%order_id, error = %err, "could not mark order failed");
        }
    }

    /// Applies a status through the idempotent store path.
    async fn apply_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        correlation_id: CorrelationId,
    ) -> Result<StatusChange> {
        let change = self.store.update_status_by_order(order_id, status).await?;
        match change {
            StatusChange::Applied { from } => {
                tracing::debug!(%order_id, %from, to = %status, "order status applied");
            }
            StatusChange::Overridden { from } => {
                metrics::counter!("order_status_overrides_total").increment(1);
                tracing::warn!(
                    audit = true,
                    %order_id,
                    %correlation_id,
                    %from,
                    to = %status,
                    "terminal order status overridden"
                );
            }
            StatusChange::Unchanged => {
                tracing::debug!(%order_id, %status, "order status unchanged");
            }
        }
        Ok(change)
    }

    async fn abort(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        correlation_id: CorrelationId,
        cause: &SagaError,
    ) {
        metrics::counter!("saga_failed_total", "kind" => cause.kind().as_str()).increment(1);
        tracing::warn!(
            %order_id,
            %correlation_id,
            error_kind = %cause.kind(),
            error = %cause,
            "saga failed"
        );

        if let Err(err) = self.compensate(order_id, status, correlation_id).await {
            tracing::error!(%order_id, %correlation_id, error = %err, "compensation could not run");
        }
    }

    async fn publish_compensation(
        &self,
        report: &mut CompensationReport,
        action: CompensationAction,
        queue: &str,
        event: &DeclineEvent,
    ) {
        match self
            .bus
            .publish_json(queue, event, Some(event.correlation_id))
            .await
        {
            Ok(_) => report.record_issued(action),
            Err(err) => report.record_failure(action, err.to_string()),
        }
    }

    async fn call_gateway<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<std::result::Result<T, GatewayError>>
    where
        F: Future<Output = std::result::Result<T, GatewayError>>,
    {
        tokio::time::timeout(self.config.gateway_timeout, call)
            .await
            .map_err(|_| SagaError::Timeout {
                operation,
                after: self.config.gateway_timeout,
            })
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order_by_id(order_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))
    }
}

pub(crate) fn require_user(user_id: &UserId) -> Result<()> {
    if user_id.is_blank() {
        return Err(SagaError::InvalidInput("userId is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{BasketCheck, InMemoryPaymentGateway, InMemoryWarehouseGateway};
    use async_trait::async_trait;
    use message_bus::{InMemoryMessageBus, Message, Subscription};
    use order_store::{InMemoryOrderStore, OrderItem, Reservation};
    use tokio::sync::Notify;

    type TestOrchestrator = SagaOrchestrator<
        InMemoryOrderStore,
        InMemoryMessageBus,
        InMemoryWarehouseGateway,
        InMemoryPaymentGateway,
    >;

    fn setup() -> (
        TestOrchestrator,
        InMemoryOrderStore,
        Arc<InMemoryMessageBus>,
        InMemoryWarehouseGateway,
        InMemoryPaymentGateway,
    ) {
        let store = InMemoryOrderStore::new();
        let bus = Arc::new(InMemoryMessageBus::new());
        let warehouse = InMemoryWarehouseGateway::new();
        let payment = InMemoryPaymentGateway::new();

        let orchestrator = SagaOrchestrator::new(
            store.clone(),
            bus.clone(),
            warehouse.clone(),
            payment.clone(),
            SagaConfig {
                gateway_timeout: Duration::from_millis(200),
                ..SagaConfig::default()
            },
        );

        (orchestrator, store, bus, warehouse, payment)
    }

    fn user() -> UserId {
        UserId::new("u1")
    }

    /// Pauses right after a side effect lands until the test releases it.
    #[derive(Clone, Default)]
    struct Gate {
        reached: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl Gate {
        async fn hold(&self) {
            self.reached.notify_one();
            self.release.notified().await;
        }
    }

    /// Bus whose delivery hand-off stalls after the broker accepted it.
    struct GatedBus {
        inner: Arc<InMemoryMessageBus>,
        queue: String,
        gate: Gate,
    }

    #[async_trait]
    impl MessageBus for GatedBus {
        async fn publish(&self, message: Message) -> message_bus::Result<()> {
            let gated = message.queue == self.queue;
            self.inner.publish(message).await?;
            if gated {
                self.gate.hold().await;
            }
            Ok(())
        }

        async fn subscribe(&self, queue: &str) -> message_bus::Result<Subscription> {
            self.inner.subscribe(queue).await
        }

        async fn close(&self) -> message_bus::Result<()> {
            self.inner.close().await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
    }

    /// Warehouse whose bind stalls after the basket is bound.
    struct GatedWarehouse {
        inner: InMemoryWarehouseGateway,
        gate: Gate,
    }

    #[async_trait]
    impl WarehouseGateway for GatedWarehouse {
        async fn check_basket(
            &self,
            user_id: &UserId,
        ) -> std::result::Result<BasketCheck, GatewayError> {
            self.inner.check_basket(user_id).await
        }

        async fn bind_basket(
            &self,
            user_id: &UserId,
            order_id: OrderId,
        ) -> std::result::Result<Reservation, GatewayError> {
            let reservation = self.inner.bind_basket(user_id, order_id).await;
            self.gate.hold().await;
            reservation
        }

        async fn order_details(
            &self,
            order_id: OrderId,
        ) -> std::result::Result<Option<Reservation>, GatewayError> {
            self.inner.order_details(order_id).await
        }
    }

    #[tokio::test]
    async fn test_start_validates_input() {
        let (orchestrator, _, _, _, _) = setup();

        let blank_user = orchestrator
            .start(&UserId::new(" "), &ReferenceId::new("r1"))
            .await;
        assert!(matches!(blank_user, Err(SagaError::InvalidInput(_))));

        let blank_reference = orchestrator.start(&user(), &ReferenceId::new("")).await;
        assert!(matches!(blank_reference, Err(SagaError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_reserve_attaches_totals() {
        let (orchestrator, _, bus, warehouse, _) = setup();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 1999)]);

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let reserved = orchestrator.reserve(&order).await.unwrap();

        assert_eq!(reserved.status, OrderStatus::Reserved);
        assert_eq!(reserved.total_amount, 1999);
        assert_eq!(reserved.items_count, 1);
        assert!(reserved.is_reserved());
        assert_eq!(bus.published_count(&orchestrator.config().queues.warehouse_decline).await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_products_fail_the_order() {
        let (orchestrator, store, _, warehouse, _) = setup();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 500)]);
        warehouse.mark_unavailable("SKU-1");

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let err = orchestrator.reserve(&order).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProductUnavailable);
        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert!(!stored.is_reserved());
        assert!(stored.is_compensated());
    }

    #[tokio::test]
    async fn test_bind_rejection_is_bind_failure() {
        let (orchestrator, _, _, warehouse, _) = setup();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 500)]);
        warehouse.set_fail_on_bind(true);

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let err = orchestrator.reserve(&order).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WarehouseBindFailed);
    }

    #[tokio::test]
    async fn test_warehouse_transport_error_is_upstream() {
        let (orchestrator, _, _, warehouse, _) = setup();
        warehouse.set_fail_on_check(true);

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let err = orchestrator.reserve(&order).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_warehouse_times_out() {
        let (orchestrator, store, _, warehouse, _) = setup();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 500)]);
        warehouse.set_delay(Some(Duration::from_secs(10)));

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let err = orchestrator.reserve(&order).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_dispatch_requires_reserved_order() {
        let (orchestrator, _, _, _, _) = setup();
        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();

        let err = orchestrator
            .dispatch(&order, &DeliveryDetails::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unprocessable);
    }

    #[tokio::test]
    async fn test_dispatch_publish_failure_compensates_reservation() {
        let (orchestrator, store, bus, warehouse, _) = setup();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 500)]);

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let reserved = orchestrator.reserve(&order).await.unwrap();

        bus.set_fail_on_publish(true);
        let err = orchestrator
            .dispatch(&reserved, &DeliveryDetails::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);

        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert!(stored.is_compensated());
        assert!(!stored.is_dispatched());
    }

    #[tokio::test]
    async fn test_status_event_requires_process_status() {
        let (orchestrator, _, _, _, _) = setup();
        let message = SagaMessage::rollback(OrderId::new());

        let err = orchestrator.on_status_event(&message).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_failed_status_event_compensates() {
        let (orchestrator, store, _, _, _) = setup();
        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();

        let mut message = SagaMessage::status_update(order.order_id, OrderStatus::Confirming);
        message.status = false;
        orchestrator.on_status_event(&message).await.unwrap();

        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert!(stored.is_compensated());
    }

    #[tokio::test]
    async fn test_compensate_rejects_non_failure_status() {
        let (orchestrator, _, _, _, _) = setup();
        let err = orchestrator
            .compensate(OrderId::new(), OrderStatus::Completed, CorrelationId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_decline_unknown_order_is_unprocessable() {
        let (orchestrator, _, _, _, _) = setup();
        let err = orchestrator
            .decline_order(&user(), OrderId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unprocessable);
    }

    #[tokio::test]
    async fn test_list_orders_enriches_from_warehouse() {
        let (orchestrator, store, _, warehouse, _) = setup();
        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 3, 100)]);
        warehouse.bind_basket(&user(), order.order_id).await.unwrap();

        let orders = orchestrator.list_orders(&user(), None).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total_amount, 300);
        assert_eq!(orders[0].items_count, 3);

        // enrichment does not write back
        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.total_amount, 0);
    }

    #[tokio::test]
    async fn test_list_orders_survives_enrichment_failure() {
        let (orchestrator, _, _, warehouse, _) = setup();
        orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        warehouse.set_fail_on_details(true);

        let orders = orchestrator.list_orders(&user(), None).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total_amount, 0);
    }

    #[tokio::test]
    async fn test_rollback_during_dispatch_still_declines_delivery() {
        let store = InMemoryOrderStore::new();
        let inner = Arc::new(InMemoryMessageBus::new());
        let queues = QueueNames::default();
        let gate = Gate::default();
        let bus = Arc::new(GatedBus {
            inner: inner.clone(),
            queue: queues.delivery_order_action.clone(),
            gate: gate.clone(),
        });
        let warehouse = InMemoryWarehouseGateway::new();
        warehouse.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 500)]);
        let payment = InMemoryPaymentGateway::new();
        let orchestrator = Arc::new(SagaOrchestrator::new(
            store.clone(),
            bus,
            warehouse,
            payment.clone(),
            SagaConfig::default(),
        ));

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let reserved = orchestrator.reserve(&order).await.unwrap();

        let dispatching = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .dispatch(&reserved, &DeliveryDetails::default())
                    .await
            }
        });
        gate.reached.notified().await;
        assert_eq!(inner.published_count(&queues.delivery_order_action).await, 1);

        let report = orchestrator
            .on_rollback_event(&SagaMessage::rollback(order.order_id))
            .await
            .unwrap();
        assert!(report.issued(CompensationAction::WarehouseDecline));
        assert!(!report.issued(CompensationAction::DeliveryDecline));

        gate.release.notify_one();
        let err = dispatching.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unprocessable);

        assert_eq!(inner.published_count(&queues.warehouse_decline).await, 1);
        assert_eq!(inner.published_count(&queues.delivery_decline).await, 1);
        assert!(payment.was_reversed(order.order_id));

        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Declined);
        assert!(stored.is_dispatched());
    }

    #[tokio::test]
    async fn test_rollback_during_bind_still_declines_warehouse() {
        let store = InMemoryOrderStore::new();
        let bus = Arc::new(InMemoryMessageBus::new());
        let queues = QueueNames::default();
        let gate = Gate::default();
        let inner = InMemoryWarehouseGateway::new();
        inner.set_basket(&user(), vec![OrderItem::new("SKU-1", 1, 500)]);
        let orchestrator = Arc::new(SagaOrchestrator::new(
            store.clone(),
            bus.clone(),
            GatedWarehouse {
                inner,
                gate: gate.clone(),
            },
            InMemoryPaymentGateway::new(),
            SagaConfig::default(),
        ));

        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let reserving = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let order = order.clone();
            async move { orchestrator.reserve(&order).await }
        });
        gate.reached.notified().await;

        let report = orchestrator
            .on_rollback_event(&SagaMessage::rollback(order.order_id))
            .await
            .unwrap();
        assert!(report.issued.is_empty());

        gate.release.notify_one();
        let err = reserving.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unprocessable);

        assert_eq!(bus.published_count(&queues.warehouse_decline).await, 1);
        assert_eq!(bus.published_count(&queues.delivery_decline).await, 0);
        let stored = store.get_order_by_id(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Declined);
        assert!(!stored.status_overridden);
    }

    #[tokio::test]
    async fn test_declining_failed_order_keeps_first_failure() {
        let (orchestrator, _, bus, _, _) = setup();
        let order = orchestrator
            .start(&user(), &ReferenceId::new("r1"))
            .await
            .unwrap();
        let err = orchestrator.reserve(&order).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyBasket);

        let declined = orchestrator
            .decline_order(&user(), order.order_id)
            .await
            .unwrap();
        assert_eq!(declined.status, OrderStatus::Failed);
        assert!(!declined.status_overridden);
        assert_eq!(bus.published_count(&orchestrator.config().queues.warehouse_decline).await, 0);
    }
}
