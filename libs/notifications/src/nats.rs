//! NATS-backed implementations of the notification ports.
//!
//! Persistence publishes records onto a durable stream consumed by the
//! document service; realtime delivery is a plain core publish on a
//! per-user subject that websocket gateways subscribe to.

use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context;
use async_nats::Client;
use async_trait::async_trait;
use jobs::PipelineError;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::Notification;
use crate::ports::{NotificationStore, PublishError, RealtimePublisher};

const PERSIST_STREAM: &str = "NOTIFICATIONS";
const PERSIST_SUBJECT: &str = "notifications.persist";

/// Durable store: appends records to the `NOTIFICATIONS` stream.
pub struct NatsStore {
    jetstream: Context,
}

impl NatsStore {
    pub fn new(jetstream: Context) -> Self {
        Self { jetstream }
    }

    /// Create the persistence stream idempotently.
    pub async fn ensure_stream(&self) -> Result<(), PipelineError> {
        if self.jetstream.get_stream(PERSIST_STREAM).await.is_ok() {
            return Ok(());
        }

        info!(stream = PERSIST_STREAM, "Creating notification persistence stream");
        self.jetstream
            .create_stream(StreamConfig {
                name: PERSIST_STREAM.to_string(),
                subjects: vec![PERSIST_SUBJECT.to_string()],
                max_messages: 1_000_000,
                max_age: Duration::from_secs(90 * 24 * 60 * 60), // 90 days
                ..Default::default()
            })
            .await
            .map_err(|e| PipelineError::temporary(format!("create stream: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for NatsStore {
    async fn insert(&self, notification: &Notification) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(notification)
            .map_err(|e| PipelineError::validation(e.to_string()))?;

        self.jetstream
            .publish(PERSIST_SUBJECT, payload.into())
            .await
            .map_err(|e| PipelineError::temporary(format!("persist publish: {e}")))?
            .await
            .map_err(|e| PipelineError::temporary(format!("persist ack: {e}")))?;

        debug!(
            id = %notification.id,
            receiver = %notification.receiver,
            "Persisted notification"
        );
        Ok(())
    }
}

/// Realtime publisher: one core publish per recipient subject.
pub struct NatsRealtime {
    client: Client,
    subject_prefix: String,
}

impl NatsRealtime {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            subject_prefix: "notifications.user".to_string(),
        }
    }
}

#[async_trait]
impl RealtimePublisher for NatsRealtime {
    async fn publish(
        &self,
        receiver: &str,
        notification: &Notification,
    ) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(notification).map_err(|e| PublishError(e.to_string()))?;
        let subject = format!("{}.{receiver}", self.subject_prefix);

        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| PublishError(e.to_string()))
    }
}
