use thiserror::Error;

/// Errors that can occur when talking to the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker refused or dropped the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every connection attempt allowed by the retry policy failed.
    #[error("Could not connect to {endpoint} after {attempts} attempts: {last_error}")]
    ConnectRetriesExhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    /// The bus was closed; no more publishes or subscriptions are accepted.
    #[error("Message bus is closed")]
    Closed,

    /// The queue already has an active consumer.
    #[error("Queue {0} already has a consumer")]
    AlreadySubscribed(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for message bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
