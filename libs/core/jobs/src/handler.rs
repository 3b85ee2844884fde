//! The trait every pipeline handler implements.

use async_trait::async_trait;

use crate::{Job, PipelineError};

/// Successful completion of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The side effect happened.
    Done,
    /// Nothing to do; the job is acked without a retry. Used when the
    /// work became moot (referenced document already deleted, actor
    /// notifying themselves).
    Skipped { reason: String },
}

impl Outcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }
}

/// A pipeline handler: receives validated jobs, performs the side effect.
///
/// Handlers never touch broker acknowledgement; the consume loop maps
/// the returned `Result` onto ack/republish/dead-letter.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Outcome, PipelineError>;

    /// Short name used in logs and metrics labels.
    fn name(&self) -> &str;
}

/// Test double: acks everything.
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    async fn handle(&self, _job: &Job) -> Result<Outcome, PipelineError> {
        Ok(Outcome::Done)
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Test double: fails every job with a fixed error.
pub struct FailingHandler {
    make_error: Box<dyn Fn() -> PipelineError + Send + Sync>,
}

impl FailingHandler {
    pub fn new(make_error: impl Fn() -> PipelineError + Send + Sync + 'static) -> Self {
        Self { make_error: Box::new(make_error) }
    }

    pub fn temporary() -> Self {
        Self::new(|| PipelineError::temporary("simulated transient failure"))
    }

    pub fn permanent() -> Self {
        Self::new(|| PipelineError::permanent("simulated permanent failure"))
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn handle(&self, _job: &Job) -> Result<Outcome, PipelineError> {
        Err((self.make_error)())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobSource, JobType};
    use serde_json::json;

    #[tokio::test]
    async fn noop_completes() {
        let job = Job::new(JobType::SendEmail, json!({}), JobSource::System).unwrap();
        assert_eq!(NoOpHandler.handle(&job).await.unwrap(), Outcome::Done);
    }

    #[tokio::test]
    async fn failing_handler_reports_configured_category() {
        let job = Job::new(JobType::SendEmail, json!({}), JobSource::System).unwrap();
        assert!(FailingHandler::permanent()
            .handle(&job)
            .await
            .unwrap_err()
            .is_permanent());
        assert!(!FailingHandler::temporary()
            .handle(&job)
            .await
            .unwrap_err()
            .is_permanent());
    }
}
