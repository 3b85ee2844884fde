//! The mail queue's job handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobs::{Job, JobHandler, JobType, Outcome, PipelineError};
use tracing::info;

use crate::payload::MailPayload;
use crate::transport::MailTransport;

/// Handles `SEND_OTP` and `SEND_EMAIL`: parse, validate, one transport
/// send per successful attempt. Nothing is persisted locally; the
/// provider's acceptance is the outcome.
pub struct MailHandler {
    transport: Arc<dyn MailTransport>,
    send_timeout: Duration,
}

impl MailHandler {
    pub fn new(transport: Arc<dyn MailTransport>, send_timeout: Duration) -> Self {
        Self {
            transport,
            send_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for MailHandler {
    async fn handle(&self, job: &Job) -> Result<Outcome, PipelineError> {
        match job.job_type {
            JobType::SendOtp | JobType::SendEmail => {}
            other => {
                // Misrouted job; re-routing won't happen on retry.
                return Err(PipelineError::permanent(format!(
                    "job type {other} does not belong on the mail queue"
                )));
            }
        }

        let mail = MailPayload::from_value(&job.payload)?.validate()?;

        let receipt = tokio::time::timeout(self.send_timeout, self.transport.send(&mail))
            .await
            .map_err(|_| PipelineError::temporary("mail send exceeded handler deadline"))?
            .map_err(|e| e.classify())?;

        info!(
            job_id = %job.job_id,
            job_type = %job.job_type,
            transport = self.transport.name(),
            message_id = %receipt.message_id,
            recipients = mail.to.len(),
            "Mail sent"
        );

        Ok(Outcome::Done)
    }

    fn name(&self) -> &str {
        "mail"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};
    use jobs::{ErrorCategory, JobSource};
    use serde_json::json;

    fn handler_with(transport: Arc<MockTransport>) -> MailHandler {
        MailHandler::new(transport, Duration::from_secs(5))
    }

    fn otp_job() -> Job {
        Job::new(
            JobType::SendOtp,
            json!({
                "to": "donor@example.com",
                "subject": "Your code",
                "text": "123456"
            }),
            JobSource::Api,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sends_exactly_one_mail() {
        let transport = Arc::new(MockTransport::new());
        let handler = handler_with(transport.clone());

        let outcome = handler.handle(&otp_job()).await.unwrap();
        assert_eq!(outcome, Outcome::Done);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["donor@example.com"]);
    }

    #[tokio::test]
    async fn malformed_payload_is_permanent() {
        let transport = Arc::new(MockTransport::new());
        let handler = handler_with(transport.clone());

        let job = Job::new(JobType::SendEmail, json!({ "subject": "no recipients" }), JobSource::Api)
            .unwrap();
        let err = handler.handle(&job).await.unwrap_err();

        assert!(err.is_permanent());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn provider_statuses_classify_through() {
        let transport = Arc::new(MockTransport::new());
        let handler = handler_with(transport.clone());

        transport.fail_next(TransportError::Status {
            status: 503,
            body: "maintenance".into(),
            retry_after: None,
        });
        assert_eq!(
            handler.handle(&otp_job()).await.unwrap_err().category(),
            ErrorCategory::Temporary
        );

        transport.fail_next(TransportError::Status {
            status: 401,
            body: "bad key".into(),
            retry_after: None,
        });
        assert_eq!(
            handler.handle(&otp_job()).await.unwrap_err().category(),
            ErrorCategory::Permanent
        );

        transport.fail_next(TransportError::Status {
            status: 429,
            body: "throttled".into(),
            retry_after: Some(Duration::from_secs(7)),
        });
        let err = handler.handle(&otp_job()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::RateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn notification_jobs_are_misroutes() {
        let transport = Arc::new(MockTransport::new());
        let handler = handler_with(transport);

        let job = Job::new(JobType::PostLiked, json!({}), JobSource::Api).unwrap();
        assert!(handler.handle(&job).await.unwrap_err().is_permanent());
    }
}
