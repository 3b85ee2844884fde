//! Mail transports.

pub mod mock;
pub mod sendgrid;

pub use mock::MockTransport;
pub use sendgrid::SendGridTransport;

use std::time::Duration;

use async_trait::async_trait;
use jobs::PipelineError;
use thiserror::Error;

use crate::payload::Mail;

/// Provider acknowledgement of an accepted mail.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-specific message ID.
    pub message_id: String,
}

/// A way to hand a mail to a provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<SendReceipt, TransportError>;

    fn name(&self) -> &'static str;
}

/// Transport failure, before classification.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the provider (DNS, connect, TLS).
    #[error("transport connection failed: {0}")]
    Connection(String),

    /// The send exceeded its deadline.
    #[error("send timed out")]
    Timeout,

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
        /// `Retry-After` pushback, when the provider sent one.
        retry_after: Option<Duration>,
    },

    /// Anything the transport could not pin down.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Uniform classification for the consume loop.
    ///
    /// 429 → rate-limited, 5xx and connectivity → temporary, other 4xx →
    /// permanent. Unknowns classify as temporary: losing mail silently is
    /// worse than one extra retry.
    pub fn classify(self) -> PipelineError {
        match self {
            TransportError::Connection(msg) => {
                PipelineError::temporary(format!("mail transport unreachable: {msg}"))
            }
            TransportError::Timeout => PipelineError::temporary("mail send timed out"),
            TransportError::Status {
                status: 429,
                body,
                retry_after,
            } => PipelineError::rate_limited(format!("mail provider throttled: {body}"), retry_after),
            TransportError::Status { status, body, .. } if (500..600).contains(&status) => {
                PipelineError::temporary(format!("mail provider error {status}: {body}"))
            }
            TransportError::Status { status, body, .. } if (400..500).contains(&status) => {
                PipelineError::permanent(format!("mail provider rejected send ({status}): {body}"))
            }
            TransportError::Status { status, body, .. } => {
                PipelineError::temporary(format!("unexpected provider status {status}: {body}"))
            }
            TransportError::Other(msg) => PipelineError::temporary(msg),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs::ErrorCategory;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            body: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn classification_matrix() {
        assert_eq!(status(503).classify().category(), ErrorCategory::Temporary);
        assert_eq!(status(500).classify().category(), ErrorCategory::Temporary);
        assert_eq!(status(401).classify().category(), ErrorCategory::Permanent);
        assert_eq!(status(400).classify().category(), ErrorCategory::Permanent);
        assert_eq!(
            status(429).classify().category(),
            ErrorCategory::RateLimited
        );
        // Unknowns fail open.
        assert_eq!(status(302).classify().category(), ErrorCategory::Temporary);
        assert_eq!(
            TransportError::Timeout.classify().category(),
            ErrorCategory::Temporary
        );
        assert_eq!(
            TransportError::Connection("dns".into()).classify().category(),
            ErrorCategory::Temporary
        );
    }

    #[test]
    fn rate_limit_pushback_survives_classification() {
        let err = TransportError::Status {
            status: 429,
            body: "slow down".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.classify().retry_after(), Some(Duration::from_secs(30)));
    }
}
