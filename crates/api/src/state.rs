//! Shared application state.

use std::sync::Arc;

use message_bus::InMemoryMessageBus;
use order_store::{OrderStore, SubscriptionStore};
use saga::{
    InMemoryWarehouseGateway, SagaConfig, SagaOrchestrator, SubscriptionManager,
    UnsupportedPaymentGateway,
};

pub type Orchestrator<S> =
    SagaOrchestrator<S, InMemoryMessageBus, InMemoryWarehouseGateway, UnsupportedPaymentGateway>;

pub type Subscriptions<S> =
    SubscriptionManager<S, InMemoryMessageBus, InMemoryWarehouseGateway, UnsupportedPaymentGateway>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore + SubscriptionStore> {
    pub orchestrator: Arc<Orchestrator<S>>,
    pub subscriptions: Arc<Subscriptions<S>>,
    pub warehouse: InMemoryWarehouseGateway,
}

impl<S: OrderStore + SubscriptionStore> AppState<S> {
    pub fn bus(&self) -> &Arc<InMemoryMessageBus> {
        self.orchestrator.bus()
    }
}

/// Creates the application state around the given store and bus.
///
/// Warehouse calls go to the in-process gateway and payment reversal is
/// reported as unsupported.
pub fn create_default_state<S: OrderStore + SubscriptionStore>(
    store: S,
    bus: Arc<InMemoryMessageBus>,
    config: SagaConfig,
) -> Arc<AppState<S>> {
    let warehouse = InMemoryWarehouseGateway::new();
    let orchestrator = Arc::new(SagaOrchestrator::new(
        store,
        bus,
        warehouse.clone(),
        UnsupportedPaymentGateway,
        config,
    ));
    let subscriptions = Arc::new(SubscriptionManager::new(orchestrator.clone()));

    Arc::new(AppState {
        orchestrator,
        subscriptions,
        warehouse,
    })
}
