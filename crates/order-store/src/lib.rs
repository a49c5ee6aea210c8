//! Order and subscription persistence for the order saga.
//!
//! The orchestrator only talks to storage through the [`OrderStore`] and
//! [`SubscriptionStore`] traits. Two implementations are provided:
//! [`InMemoryOrderStore`] for tests and single-process runs, and
//! [`PostgresOrderStore`] backed by `sqlx`.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod status;
pub mod store;
pub mod subscription;

pub use common::{OrderId, ReferenceId, UserId};
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{Order, OrderItem, Reservation, SagaStep, StepRecord};
pub use postgres::PostgresOrderStore;
pub use status::{OrderStatus, ParseStatusError, StatusChange, Transition};
pub use store::{OrderStore, SubscriptionStore};
pub use subscription::{
    NewSubscription, Subscription, SubscriptionLevel, SubscriptionStatus, SubscriptionToggle,
};
