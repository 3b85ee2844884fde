//! Error types for broker operations.

use thiserror::Error;

/// Error that can occur in broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// NATS connection error
    #[error("connection error: {0}")]
    Connection(#[from] async_nats::ConnectError),

    /// A connect attempt exceeded its deadline
    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// JetStream error
    #[error("jetstream error: {0}")]
    JetStream(String),

    /// Consumer error
    #[error("consumer error: {0}")]
    Consumer(String),

    /// Publish error
    #[error("publish error: {0}")]
    Publish(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A job failed wire validation
    #[error("invalid job: {0}")]
    InvalidJob(#[from] jobs::ValidationError),

    /// Reconnect budget exhausted. Fatal for the process.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectsExhausted { attempts: u32 },

    /// The manager is draining; no new work is accepted.
    #[error("broker is shutting down")]
    ShuttingDown,
}

impl BrokerError {
    pub fn from_jetstream_error(error: impl std::fmt::Display) -> Self {
        Self::JetStream(error.to_string())
    }

    pub fn publish_error(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn consumer_error(msg: impl Into<String>) -> Self {
        Self::Consumer(msg.into())
    }
}
