//! Message bus client for the order saga.
//!
//! Services exchange JSON messages over named durable queues. The
//! [`MessageBus`] trait covers publish, subscribe and lifecycle;
//! [`InMemoryMessageBus`] implements it in-process. [`spawn_consumer`]
//! runs the acknowledge-after-handle loop shared by every consumer.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod retry;

pub use bus::{MessageBus, MessageBusExt, Subscription};
pub use config::{BusConfig, RetryPolicy};
pub use consumer::{HandlerFailure, MessageHandler, spawn_consumer};
pub use error::{BusError, Result};
pub use memory::InMemoryMessageBus;
pub use message::{Acker, Delivery, Message};
pub use retry::connect_with_retry;
