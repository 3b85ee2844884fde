//! NATS JetStream plumbing for the GiveHub job pipeline.
//!
//! - **BrokerManager**: one connection + JetStream context per process,
//!   reconnect with backoff, health snapshot, graceful shutdown
//! - **Producer**: typed enqueue, routed by job type
//! - **QueueWorker**: the generic consume loop — fetch, validate,
//!   dispatch to a [`jobs::JobHandler`], ack / republish / dead-letter
//! - **DlqManager**: per-queue dead-letter streams
//! - **HealthServer** / **QueueMetrics**: probes and Prometheus counters
//!
//! Retry state rides on transport headers ([`headers::RETRY_COUNT`]); job
//! bodies are immutable for their whole lifetime.

mod config;
mod connection;
mod consumer;
mod dlq;
mod error;
pub mod headers;
mod health;
mod metrics;
mod producer;

pub use config::{ConnectConfig, QueueConfig};
pub use connection::{BrokerHealth, BrokerManager, ConnState};
pub use consumer::QueueWorker;
pub use dlq::{DlqEntry, DlqManager};
pub use error::BrokerError;
pub use health::{HealthServer, HealthState, HealthStatus};
pub use metrics::{init_metrics, QueueMetrics};
pub use producer::Producer;
