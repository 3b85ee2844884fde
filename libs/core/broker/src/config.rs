//! Broker and per-queue configuration.

use std::time::Duration;

use jobs::{Backoff, Queue, RetryPolicy};

/// How the process connects to the broker.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// NATS server URL.
    pub url: String,
    /// Client name shown in server-side connection listings.
    pub client_name: String,
    /// Deadline for a single connect attempt.
    pub connect_timeout: Duration,
    /// Connect/reconnect attempts before the manager gives up for good.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Interval for connection liveness checks (the worker's watchdog).
    pub heartbeat: Duration,
}

/// Read an env var, falling back to a default when unset or unparseable.
pub(crate) fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ConnectConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_name: "givehub-worker".to_string(),
            connect_timeout: Duration::from_secs(5),
            max_attempts: 10,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(500),
                cap: Duration::from_secs(30),
            },
            heartbeat: Duration::from_secs(5),
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build from environment, with local-dev defaults.
    pub fn from_env() -> Self {
        let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        Self {
            url,
            client_name: std::env::var("BROKER_CLIENT_NAME")
                .unwrap_or_else(|_| "givehub-worker".to_string()),
            connect_timeout: Duration::from_millis(env_or_default(
                "BROKER_CONNECT_TIMEOUT_MS",
                5_000,
            )),
            max_attempts: env_or_default("BROKER_MAX_RECONNECTS", 10),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(env_or_default("BROKER_RECONNECT_BASE_MS", 500)),
                cap: Duration::from_millis(env_or_default("BROKER_RECONNECT_CAP_MS", 30_000)),
            },
            heartbeat: Duration::from_secs(env_or_default("BROKER_HEARTBEAT_SECS", 5)),
        }
    }
}

/// Configuration for one durable queue and its worker.
///
/// Stream and consumer names are derived from the subject so a queue is
/// fully described by one string: `mail.send` becomes stream `MAIL_SEND`,
/// durable `mail-send-worker` and DLQ stream `MAIL_SEND_DLQ`.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub subject: String,
    pub stream: String,
    pub durable: String,
    pub dlq_stream: String,
    /// Messages fetched per batch; also the backpressure bound — at most
    /// this many deliveries are in flight per worker.
    pub batch_size: usize,
    /// How long the server waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Server-side delivery ceiling, a backstop behind the retry policy.
    pub max_deliver: i64,
    /// How long a fetch waits for messages before returning empty.
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl QueueConfig {
    pub fn new(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        let stream = subject.to_uppercase().replace(['.', '-'], "_");
        let durable = format!("{}-worker", subject.replace('.', "-"));
        let dlq_stream = format!("{stream}_DLQ");
        Self {
            subject,
            stream,
            durable,
            dlq_stream,
            batch_size: 10,
            ack_wait: Duration::from_secs(30),
            max_deliver: 10,
            fetch_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    /// Config for one of the two platform queues.
    pub fn for_queue(queue: Queue) -> Self {
        Self::new(queue.default_subject())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_config_from_env() {
        temp_env::with_vars(
            [
                ("NATS_URL", Some("nats://broker:4222")),
                ("BROKER_MAX_RECONNECTS", Some("3")),
                ("BROKER_CONNECT_TIMEOUT_MS", Some("1500")),
            ],
            || {
                let cfg = ConnectConfig::from_env();
                assert_eq!(cfg.url, "nats://broker:4222");
                assert_eq!(cfg.max_attempts, 3);
                assert_eq!(cfg.connect_timeout, Duration::from_millis(1500));
            },
        );
    }

    #[test]
    fn env_defaults_survive_garbage() {
        temp_env::with_var("BROKER_MAX_RECONNECTS", Some("lots"), || {
            assert_eq!(env_or_default("BROKER_MAX_RECONNECTS", 10u32), 10);
        });
    }

    #[test]
    fn names_derived_from_subject() {
        let cfg = QueueConfig::new("mail.send");
        assert_eq!(cfg.stream, "MAIL_SEND");
        assert_eq!(cfg.durable, "mail-send-worker");
        assert_eq!(cfg.dlq_stream, "MAIL_SEND_DLQ");
    }

    #[test]
    fn platform_queues() {
        assert_eq!(QueueConfig::for_queue(Queue::Mail).subject, "mail.send");
        assert_eq!(
            QueueConfig::for_queue(Queue::Notification).subject,
            "notification.create"
        );
    }
}
