//! End-to-end pipeline tests against a real broker.
//!
//! These need a local NATS server with JetStream enabled
//! (`nats-server -js`); run them with `cargo test -- --ignored`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{BrokerManager, ConnectConfig, Producer, QueueConfig, QueueWorker};
use jobs::{
    Backoff, Job, JobHandler, JobSource, JobType, Outcome, PipelineError, RetryPolicy,
};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

/// Fails the first `failures` calls with a temporary error, then succeeds.
struct FlakyHandler {
    calls: Arc<AtomicU32>,
    failures: u32,
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, _job: &Job) -> Result<Outcome, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(PipelineError::temporary("not yet"))
        } else {
            Ok(Outcome::Done)
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        backoff: Backoff::Fixed(Duration::from_millis(50)),
    }
}

async fn wait_for(calls: &AtomicU32, expected: u32) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while calls.load(Ordering::SeqCst) < expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected} handler calls, saw {}",
            calls.load(Ordering::SeqCst)
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
#[ignore = "requires a local NATS server with JetStream"]
async fn transient_failures_republish_until_success() {
    let subject = format!("pipetest.{}", Uuid::new_v4().simple());
    let metrics = broker::init_metrics().unwrap();
    let manager = Arc::new(BrokerManager::new(ConnectConfig::from_env()));

    let calls = Arc::new(AtomicU32::new(0));
    let handler = FlakyHandler {
        calls: calls.clone(),
        failures: 2,
    };
    let config = QueueConfig::new(&subject).with_retry(fast_retry());

    let worker = QueueWorker::new(manager.clone(), handler, config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    // Let the worker create the stream before we publish into it.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let producer = Producer::new(manager.clone()).with_subjects(&subject, &subject);
    let job = Job::new(
        JobType::SendEmail,
        json!({ "to": "donor@example.com", "subject": "hi", "text": "hello" }),
        JobSource::System,
    )
    .unwrap();
    producer.enqueue(&job).await.unwrap();

    // Two failed attempts plus the successful third.
    wait_for(&calls, 3).await;

    // The worker samples queue depth into the Prometheus gauge.
    assert!(metrics.render().contains("pipeline_stream_depth"));

    shutdown_tx.send(true).unwrap();
    worker_task.await.unwrap().unwrap();
    manager.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local NATS server with JetStream"]
async fn permanent_failures_deliver_exactly_once() {
    let subject = format!("pipetest.{}", Uuid::new_v4().simple());
    let manager = Arc::new(BrokerManager::new(ConnectConfig::from_env()));

    let calls = Arc::new(AtomicU32::new(0));
    let handler = FlakyHandler {
        calls: calls.clone(),
        failures: u32::MAX, // would fail forever if redelivered
    };
    let config = QueueConfig::new(&subject).with_retry(fast_retry());

    // Permanent error instead of temporary: wrap the flaky handler.
    struct PermanentHandler(FlakyHandler);
    #[async_trait]
    impl JobHandler for PermanentHandler {
        async fn handle(&self, job: &Job) -> Result<Outcome, PipelineError> {
            self.0.handle(job).await.map_err(|_| {
                PipelineError::permanent("unrecoverable")
            })
        }
        fn name(&self) -> &str {
            "permanent"
        }
    }

    let worker = QueueWorker::new(manager.clone(), PermanentHandler(handler), config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(500)).await;

    let producer = Producer::new(manager.clone()).with_subjects(&subject, &subject);
    let job = Job::new(
        JobType::SendEmail,
        json!({ "to": "donor@example.com", "subject": "hi", "text": "hello" }),
        JobSource::System,
    )
    .unwrap();
    producer.enqueue(&job).await.unwrap();

    wait_for(&calls, 1).await;

    // Give the loop time to (wrongly) redeliver before asserting.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    shutdown_tx.send(true).unwrap();
    worker_task.await.unwrap().unwrap();
    manager.shutdown().await.unwrap();
}
