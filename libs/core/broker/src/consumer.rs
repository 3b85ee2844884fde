//! Generic consume loop: fetch, validate, dispatch, settle.
//!
//! One `QueueWorker` per queue drives one `JobHandler`. The loop owns all
//! acknowledgement decisions; handlers only report success, skip, or a
//! categorized error.
//!
//! Retries republish. A failed delivery worth retrying is re-enqueued as
//! a fresh message carrying the original body and an incremented
//! `X-Retry-Count` header, and the original delivery is acked. Redelivery
//! state thus lives in the durable message, not in broker redelivery
//! bookkeeping, and the body never mutates.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::jetstream::consumer::pull::Config as ConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::stream::{Config as StreamConfig, Stream as JsStream};
use async_nats::jetstream::{AckKind, Context, Message};
use futures::{FutureExt, StreamExt};
use jobs::{ErrorCategory, Job, JobHandler, Outcome, PipelineError};
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::connection::BrokerManager;
use crate::dlq::{DlqEntry, DlqManager};
use crate::error::BrokerError;
use crate::headers;
use crate::metrics::QueueMetrics;

type PullConsumer = Consumer<ConsumerConfig>;

/// Delivery ceiling for panicking handlers, deliberately smaller than the
/// handler retry budget: a panic is a bug, not a transient.
fn panic_ceiling(max_retries: u32) -> u32 {
    max_retries / 2 + 1
}

/// Consumes one queue with bounded concurrency.
pub struct QueueWorker<H: JobHandler + 'static> {
    manager: Arc<BrokerManager>,
    handler: Arc<H>,
    config: QueueConfig,
}

impl<H: JobHandler + 'static> QueueWorker<H> {
    pub fn new(manager: Arc<BrokerManager>, handler: H, config: QueueConfig) -> Self {
        Self {
            manager,
            handler: Arc::new(handler),
            config,
        }
    }

    /// Run until the shutdown channel flips to `true`.
    ///
    /// Each consume session binds to one live connection. When the
    /// connection is lost mid-run the session is torn down and rebuilt
    /// through the manager, so a broker that stays away long enough
    /// surfaces `ReconnectsExhausted` here, which is fatal for the
    /// process.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), BrokerError> {
        info!(
            stream = %self.config.stream,
            durable = %self.config.durable,
            handler = %self.handler.name(),
            "Starting queue worker"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.consume(&mut shutdown_rx).await {
                Ok(()) => break,
                Err(e)
                    if matches!(
                        e,
                        BrokerError::ReconnectsExhausted { .. } | BrokerError::ShuttingDown
                    ) =>
                {
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        stream = %self.config.stream,
                        error = %e,
                        "Consume session failed, re-establishing"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(stream = %self.config.stream, "Queue worker stopped");
        Ok(())
    }

    /// One consume session over one live connection.
    ///
    /// Ensures the stream, the durable consumer and the DLQ stream exist,
    /// then loops over fetch batches. In-flight deliveries finish before
    /// the session returns; unfetched messages stay on the stream.
    /// Returns `Ok` on shutdown; an error means the session is dead and
    /// must be rebuilt.
    async fn consume(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), BrokerError> {
        let jetstream = self.manager.jetstream().await?;
        self.ensure_stream(&jetstream).await?;
        let mut stream = jetstream
            .get_stream(&self.config.stream)
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        let consumer = self.ensure_consumer(&stream).await?;

        let dlq = DlqManager::new(jetstream.clone(), &self.config.dlq_stream);
        dlq.ensure_stream().await?;

        let ctx = Arc::new(ProcessCtx {
            handler: self.handler.clone(),
            metrics: QueueMetrics::new(&self.config.subject, self.handler.name()),
            config: self.config.clone(),
            jetstream,
            dlq,
        });
        let semaphore = Arc::new(Semaphore::new(self.config.batch_size));

        const DEPTH_INTERVAL: Duration = Duration::from_secs(30);
        let mut depth_refreshed = Instant::now();
        if let Ok(info) = stream.info().await {
            ctx.metrics.stream_depth(info.state.messages);
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(stream = %self.config.stream, "Shutdown signal received, stopping worker");
                        return Ok(());
                    }
                }

                result = Self::process_batch(&consumer, &ctx, &semaphore) => {
                    if let Err(e) = result {
                        error!(stream = %self.config.stream, error = %e, "Error processing batch");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        if !self.manager.is_connected() {
                            // The connection is gone; this session's
                            // consumer is bound to the dead client.
                            return Err(e);
                        }
                        continue;
                    }

                    if depth_refreshed.elapsed() >= DEPTH_INTERVAL {
                        if let Ok(info) = stream.info().await {
                            ctx.metrics.stream_depth(info.state.messages);
                        }
                        depth_refreshed = Instant::now();
                    }
                }
            }
        }
    }

    async fn process_batch(
        consumer: &PullConsumer,
        ctx: &Arc<ProcessCtx<H>>,
        semaphore: &Arc<Semaphore>,
    ) -> Result<(), BrokerError> {
        let mut batch = consumer
            .fetch()
            .max_messages(ctx.config.batch_size)
            .expires(ctx.config.fetch_timeout)
            .messages()
            .await
            .map_err(BrokerError::from_jetstream_error)?;

        let mut tasks = Vec::new();
        while let Some(next) = batch.next().await {
            match next {
                Ok(message) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| BrokerError::consumer_error(e.to_string()))?;
                    let ctx = ctx.clone();
                    tasks.push(tokio::spawn(async move {
                        let _permit = permit;
                        ctx.process(message).await;
                    }));
                }
                Err(e) => {
                    warn!(error = %e, "Error receiving message");
                }
            }
        }

        if tasks.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Processing task failed");
            }
        }

        Ok(())
    }

    async fn ensure_stream(&self, jetstream: &Context) -> Result<(), BrokerError> {
        match jetstream.get_stream(&self.config.stream).await {
            Ok(_) => {
                debug!(stream = %self.config.stream, "Stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(
                    stream = %self.config.stream,
                    subject = %self.config.subject,
                    "Creating stream"
                );

                jetstream
                    .create_stream(StreamConfig {
                        name: self.config.stream.clone(),
                        subjects: vec![self.config.subject.clone()],
                        max_messages: 100_000,
                        max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
                        ..Default::default()
                    })
                    .await
                    .map_err(BrokerError::from_jetstream_error)?;

                Ok(())
            }
        }
    }

    async fn ensure_consumer(&self, stream: &JsStream) -> Result<PullConsumer, BrokerError> {
        match stream
            .get_consumer::<ConsumerConfig>(&self.config.durable)
            .await
        {
            Ok(consumer) => {
                debug!(consumer = %self.config.durable, "Consumer already exists");
                Ok(consumer)
            }
            Err(_) => {
                info!(
                    consumer = %self.config.durable,
                    stream = %self.config.stream,
                    "Creating consumer"
                );

                stream
                    .create_consumer(ConsumerConfig {
                        durable_name: Some(self.config.durable.clone()),
                        name: Some(self.config.durable.clone()),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: self.config.ack_wait,
                        max_deliver: self.config.max_deliver,
                        filter_subject: self.config.subject.clone(),
                        ..Default::default()
                    })
                    .await
                    .map_err(BrokerError::from_jetstream_error)
            }
        }
    }
}

/// Everything one in-flight delivery needs, shared across spawned tasks.
struct ProcessCtx<H: JobHandler> {
    handler: Arc<H>,
    metrics: QueueMetrics,
    config: QueueConfig,
    jetstream: Context,
    dlq: DlqManager,
}

impl<H: JobHandler> ProcessCtx<H> {
    async fn process(&self, message: Message) {
        self.metrics.job_received();

        let delivery_count = match message.info() {
            Ok(info) => info.delivered as u32,
            Err(e) => {
                warn!(error = %e, "Failed to read delivery info, assuming first delivery");
                1
            }
        };

        if let Err(e) = self.process_inner(message, delivery_count).await {
            // Leaving the delivery unsettled is the fallback: ack_wait
            // expiry redelivers it.
            error!(error = %e, "Failed to settle delivery");
        }
    }

    async fn process_inner(
        &self,
        message: Message,
        delivery_count: u32,
    ) -> Result<(), BrokerError> {
        let payload = message.payload.clone();

        // Unparseable and malformed bodies are permanent: dead-letter and
        // terminate so they never burn redelivery budget.
        let value: Value = match serde_json::from_slice(&payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, queue = %self.config.subject, "Unparseable payload, dead-lettering");
                self.dlq
                    .record(&DlqEntry::unparseable(&payload, &e.to_string()))
                    .await?;
                self.metrics.job_dead_lettered();
                return settle(message, AckKind::Term).await;
            }
        };

        let job = match Job::validate_wire(&value) {
            Ok(job) => job,
            Err(e) => {
                let job_id = value.get("jobId").and_then(Value::as_str).map(String::from);
                warn!(
                    error = %e,
                    job_id = job_id.as_deref().unwrap_or("unknown"),
                    queue = %self.config.subject,
                    "Invalid job, dead-lettering"
                );
                self.dlq
                    .record(&DlqEntry::new(job_id, value, &e.to_string(), 0))
                    .await?;
                self.metrics.job_dead_lettered();
                return settle(message, AckKind::Term).await;
            }
        };

        let retry_count = headers::retry_count(message.headers.as_ref());
        if retry_count > 0 {
            debug!(
                job_id = %job.job_id,
                retry_count = retry_count,
                "Processing republished job"
            );
        }

        let start = Instant::now();
        let result = AssertUnwindSafe(self.handler.handle(&job)).catch_unwind().await;
        let duration = start.elapsed();

        match result {
            Ok(Ok(Outcome::Done)) => {
                settle(message, AckKind::Ack).await?;
                self.metrics.job_processed(duration);
                debug!(
                    job_id = %job.job_id,
                    job_type = %job.job_type,
                    duration_ms = duration.as_millis() as u64,
                    "Job processed"
                );
                Ok(())
            }
            Ok(Ok(Outcome::Skipped { reason })) => {
                settle(message, AckKind::Ack).await?;
                self.metrics.job_skipped();
                info!(
                    job_id = %job.job_id,
                    job_type = %job.job_type,
                    reason = %reason,
                    "Job skipped"
                );
                Ok(())
            }
            Ok(Err(e)) => self.handle_failure(message, &job, value, retry_count, e).await,
            Err(_) => self.handle_panic(message, &job, retry_count, delivery_count).await,
        }
    }

    async fn handle_failure(
        &self,
        message: Message,
        job: &Job,
        value: Value,
        retry_count: u32,
        error: PipelineError,
    ) -> Result<(), BrokerError> {
        let category = error.category();
        self.metrics.job_failed(&format!("{category:?}"));

        if category == ErrorCategory::Permanent {
            warn!(
                job_id = %job.job_id,
                error = %error,
                "Permanent error, dead-lettering"
            );
            self.dlq
                .record(&DlqEntry::new(
                    Some(job.job_id.clone()),
                    value,
                    &error.to_string(),
                    retry_count,
                ))
                .await?;
            self.metrics.job_dead_lettered();
            return settle(message, AckKind::Term).await;
        }

        if self.config.retry.should_retry(retry_count, category) {
            let delay = self.config.retry.next_delay(retry_count, error.retry_after());
            warn!(
                job_id = %job.job_id,
                error = %error,
                retry_count = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Transient error, republishing for retry"
            );
            // Holds this delivery's concurrency slot; the rest of the
            // batch keeps flowing.
            tokio::time::sleep(delay).await;
            return self.republish(message, retry_count + 1).await;
        }

        error!(
            job_id = %job.job_id,
            error = %error,
            retry_count = retry_count,
            "Retries exhausted, dead-lettering"
        );
        self.dlq
            .record(&DlqEntry::new(
                Some(job.job_id.clone()),
                value,
                &error.to_string(),
                retry_count,
            ))
            .await?;
        self.metrics.job_dead_lettered();
        settle(message, AckKind::Term).await
    }

    /// Publish a fresh message with the original body and incremented
    /// retry header, then ack the original delivery. A failed republish
    /// terminates the delivery: redelivering the original here could loop
    /// forever against a broken publish path.
    async fn republish(&self, message: Message, next_retry: u32) -> Result<(), BrokerError> {
        let headers = headers::next_attempt_headers(message.headers.as_ref(), next_retry);
        let publish = self
            .jetstream
            .publish_with_headers(
                message.subject.clone(),
                headers,
                message.payload.clone(),
            )
            .await;

        let published = match publish {
            Ok(ack_future) => ack_future.await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match published {
            Ok(_) => {
                self.metrics.job_retried();
                settle(message, AckKind::Ack).await
            }
            Err(e) => {
                error!(error = %e, "Republish failed, terminating delivery");
                settle(message, AckKind::Term).await
            }
        }
    }

    async fn handle_panic(
        &self,
        message: Message,
        job: &Job,
        retry_count: u32,
        delivery_count: u32,
    ) -> Result<(), BrokerError> {
        self.metrics.job_failed("Panic");
        let ceiling = panic_ceiling(self.config.retry.max_retries);

        if delivery_count >= ceiling {
            error!(
                job_id = %job.job_id,
                delivery_count = delivery_count,
                "Handler panicked repeatedly, dead-lettering"
            );
            self.dlq
                .record(&DlqEntry::new(
                    Some(job.job_id.clone()),
                    serde_json::to_value(job)?,
                    "handler panicked",
                    retry_count,
                ))
                .await?;
            self.metrics.job_dead_lettered();
            return settle(message, AckKind::Term).await;
        }

        let delay = self.config.retry.backoff.delay_with_jitter(delivery_count);
        error!(
            job_id = %job.job_id,
            delivery_count = delivery_count,
            delay_ms = delay.as_millis() as u64,
            "Handler panicked, requesting redelivery"
        );
        settle(message, AckKind::Nak(Some(delay))).await
    }
}

async fn settle(message: Message, kind: AckKind) -> Result<(), BrokerError> {
    message
        .ack_with(kind)
        .await
        .map_err(|e| BrokerError::consumer_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectConfig;
    use jobs::{Backoff, NoOpHandler, Queue};

    #[tokio::test]
    async fn exhausted_reconnects_stop_the_worker() {
        let mut connect = ConnectConfig::new("nats://127.0.0.1:1")
            .with_max_attempts(2)
            .with_connect_timeout(Duration::from_millis(200));
        connect.backoff = Backoff::Fixed(Duration::from_millis(10));
        let manager = Arc::new(BrokerManager::new(connect));
        let worker = QueueWorker::new(manager, NoOpHandler, QueueConfig::for_queue(Queue::Mail));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        // The worker must die with the fatal error, not idle in its
        // re-establish loop.
        match worker.run(shutdown_rx).await {
            Err(BrokerError::ReconnectsExhausted { attempts }) => assert_eq!(attempts, 2),
            other => panic!("expected ReconnectsExhausted, got {other:?}"),
        }
    }

    #[test]
    fn panic_ceiling_is_below_retry_budget() {
        assert_eq!(panic_ceiling(3), 2);
        assert_eq!(panic_ceiling(10), 6);
        assert_eq!(panic_ceiling(0), 1);
        for max in 1..20 {
            assert!(panic_ceiling(max) <= max);
        }
    }
}
