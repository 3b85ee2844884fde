//! Producer: enqueue jobs onto their queue's durable stream.

use std::sync::Arc;

use async_nats::jetstream::stream::Config as StreamConfig;
use jobs::{Job, Queue};
use std::time::Duration;
use tracing::{debug, info};

use crate::connection::BrokerManager;
use crate::error::BrokerError;
use crate::headers;

/// Publishes jobs, routed by job type to the mail or notification queue.
///
/// `enqueue` awaits the broker's local publish ack only; delivery to a
/// consumer is the pipeline's business, not the caller's.
#[derive(Clone)]
pub struct Producer {
    manager: Arc<BrokerManager>,
    mail_subject: String,
    notification_subject: String,
}

impl Producer {
    pub fn new(manager: Arc<BrokerManager>) -> Self {
        Self {
            manager,
            mail_subject: Queue::Mail.default_subject().to_string(),
            notification_subject: Queue::Notification.default_subject().to_string(),
        }
    }

    pub fn with_subjects(
        mut self,
        mail_subject: impl Into<String>,
        notification_subject: impl Into<String>,
    ) -> Self {
        self.mail_subject = mail_subject.into();
        self.notification_subject = notification_subject.into();
        self
    }

    fn subject_for(&self, queue: Queue) -> &str {
        match queue {
            Queue::Mail => &self.mail_subject,
            Queue::Notification => &self.notification_subject,
        }
    }

    /// Validate, serialize and publish a job with a zeroed retry header.
    ///
    /// Returns the stream sequence of the stored message.
    pub async fn enqueue(&self, job: &Job) -> Result<u64, BrokerError> {
        job.validate()?;

        let subject = self.subject_for(job.job_type.queue()).to_string();
        let payload = serde_json::to_vec(job)?;
        let jetstream = self.manager.jetstream().await?;

        let ack = jetstream
            .publish_with_headers(subject.clone(), headers::initial_headers(), payload.into())
            .await
            .map_err(|e| BrokerError::publish_error(e.to_string()))?
            .await
            .map_err(|e| BrokerError::publish_error(e.to_string()))?;

        debug!(
            job_id = %job.job_id,
            job_type = %job.job_type,
            subject = %subject,
            sequence = ack.sequence,
            "Enqueued job"
        );

        Ok(ack.sequence)
    }

    /// Create the durable stream behind a subject, idempotently.
    ///
    /// Workers do this on startup too; producers running in processes
    /// without a worker call it once during bootstrap.
    pub async fn ensure_stream(&self, queue: Queue) -> Result<(), BrokerError> {
        let subject = self.subject_for(queue).to_string();
        let stream = subject.to_uppercase().replace(['.', '-'], "_");
        let jetstream = self.manager.jetstream().await?;

        if jetstream.get_stream(&stream).await.is_ok() {
            debug!(stream = %stream, "Stream already exists");
            return Ok(());
        }

        info!(stream = %stream, subject = %subject, "Creating stream");
        jetstream
            .create_stream(StreamConfig {
                name: stream,
                subjects: vec![subject],
                max_messages: 100_000,
                max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
                ..Default::default()
            })
            .await
            .map_err(BrokerError::from_jetstream_error)?;

        Ok(())
    }
}
