//! Mail pipeline configuration.

use std::time::Duration;

use jobs::PipelineError;

/// Environment-backed mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
    /// Hard ceiling on one transport send.
    pub send_timeout: Duration,
}

impl MailConfig {
    /// Build from environment.
    ///
    /// `SENDGRID_API_KEY` and `MAIL_FROM_ADDRESS` are required; a worker
    /// deployed without them cannot send anything, so this fails loudly
    /// instead of limping along.
    pub fn from_env() -> Result<Self, PipelineError> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .map_err(|_| PipelineError::missing_dependency("SENDGRID_API_KEY not set"))?;
        let from_email = std::env::var("MAIL_FROM_ADDRESS")
            .map_err(|_| PipelineError::missing_dependency("MAIL_FROM_ADDRESS not set"))?;
        let from_name =
            std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "GiveHub".to_string());
        let send_timeout = Duration::from_millis(
            std::env::var("MAIL_SEND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
        );

        Ok(Self {
            api_key,
            from_email,
            from_name,
            send_timeout,
        })
    }
}
