//! Worker configuration from the environment.

use std::time::Duration;

use broker::{ConnectConfig, QueueConfig};
use jobs::{Backoff, Queue, RetryPolicy};

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Everything the worker reads from the environment.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub environment: Environment,
    pub health_port: u16,
    pub connect: ConnectConfig,
    pub mail_queue: QueueConfig,
    pub notification_queue: QueueConfig,
    /// Handler-side deadline for one mail send.
    pub mail_send_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        let prefetch: usize = env_or_default("BROKER_PREFETCH", 10);

        let mail_subject = std::env::var("MAIL_QUEUE")
            .unwrap_or_else(|_| Queue::Mail.default_subject().to_string());
        let mail_queue = QueueConfig::new(mail_subject)
            .with_batch_size(prefetch)
            .with_retry(RetryPolicy {
                max_retries: env_or_default("MAIL_MAX_RETRIES", 3),
                backoff: Backoff::Exponential {
                    base: Duration::from_millis(env_or_default("MAIL_RETRY_DELAY_MS", 1_000)),
                    cap: Duration::from_secs(30),
                },
            });

        let notification_subject = std::env::var("NOTIFY_QUEUE")
            .unwrap_or_else(|_| Queue::Notification.default_subject().to_string());
        let notification_queue = QueueConfig::new(notification_subject)
            .with_batch_size(prefetch)
            .with_retry(RetryPolicy {
                max_retries: env_or_default("NOTIFY_MAX_RETRIES", 3),
                backoff: Backoff::Exponential {
                    base: Duration::from_millis(env_or_default("NOTIFY_RETRY_DELAY_MS", 1_000)),
                    cap: Duration::from_secs(30),
                },
            });

        Self {
            environment: Environment::from_env(),
            health_port: env_or_default("HEALTH_PORT", 8080),
            connect: ConnectConfig::from_env(),
            mail_queue,
            notification_queue,
            mail_send_timeout: Duration::from_millis(env_or_default(
                "MAIL_SEND_TIMEOUT_MS",
                10_000,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_local_dev() {
        temp_env::with_vars(
            [
                ("APP_ENV", None::<&str>),
                ("BROKER_PREFETCH", None),
                ("MAIL_QUEUE", None),
                ("NOTIFY_QUEUE", None),
                ("MAIL_MAX_RETRIES", None),
            ],
            || {
                let settings = WorkerSettings::from_env();
                assert_eq!(settings.environment, Environment::Development);
                assert_eq!(settings.mail_queue.subject, "mail.send");
                assert_eq!(settings.notification_queue.subject, "notification.create");
                assert_eq!(settings.mail_queue.batch_size, 10);
                assert_eq!(settings.mail_queue.retry.max_retries, 3);
            },
        );
    }

    #[test]
    fn queue_overrides_apply() {
        temp_env::with_vars(
            [
                ("APP_ENV", Some("production")),
                ("MAIL_QUEUE", Some("mail.priority")),
                ("MAIL_MAX_RETRIES", Some("5")),
                ("BROKER_PREFETCH", Some("25")),
            ],
            || {
                let settings = WorkerSettings::from_env();
                assert!(settings.environment.is_production());
                assert_eq!(settings.mail_queue.subject, "mail.priority");
                assert_eq!(settings.mail_queue.stream, "MAIL_PRIORITY");
                assert_eq!(settings.mail_queue.retry.max_retries, 5);
                assert_eq!(settings.notification_queue.batch_size, 25);
            },
        );
    }
}
