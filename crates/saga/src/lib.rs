//! Saga orchestration for the order service.
//!
//! An order moves through these steps:
//! 1. Create the order row
//! 2. Reserve the basket with the warehouse
//! 3. Hand the order off to delivery
//! 4. Apply the downstream verdict received over the bus
//!
//! If any step fails, the steps that actually happened are compensated:
//! the warehouse and delivery reservations are declined over the bus and the
//! payment is reversed.

pub mod compensation;
pub mod consumers;
pub mod error;
pub mod gateways;
pub mod messages;
pub mod orchestrator;
pub mod queues;
pub mod subscription;

pub use compensation::{CompensationAction, CompensationFailure, CompensationReport};
pub use consumers::{
    OrderStatusHandler, RollbackHandler, SubscriptionActionHandler, spawn_saga_consumers,
};
pub use error::{ErrorKind, Result, SagaError};
pub use gateways::{
    BasketCheck, GatewayError, InMemoryPaymentGateway, InMemoryWarehouseGateway, PaymentGateway,
    UnsupportedPaymentGateway, WarehouseGateway,
};
pub use messages::{
    DeclineEvent, DeliveryAction, DeliveryDetails, OrderRef, SagaMessage, SubscriptionActionEvent,
};
pub use orchestrator::{DEFAULT_GATEWAY_TIMEOUT, SagaConfig, SagaOrchestrator};
pub use queues::QueueNames;
pub use subscription::SubscriptionManager;
