//! Error taxonomy for job processing.
//!
//! Handlers return `PipelineError`; the consume loop only looks at the
//! error's category to decide between retrying and dead-lettering.

use std::time::Duration;
use thiserror::Error;

/// What the consume loop does with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Worth retrying: the condition may clear on its own.
    Temporary,
    /// Never retry: the job can only fail the same way again.
    Permanent,
    /// Retry, but respect the provider's pushback.
    RateLimited,
}

/// A job processing failure, tagged with retry semantics.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The job itself is malformed. Permanent by definition.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The operation failed in a way retrying cannot fix.
    #[error("permanent failure: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A transient fault: network blip, provider 5xx, lock contention.
    #[error("temporary failure: {message}")]
    Temporary {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Provider-supplied pushback, if it sent one.
        retry_after: Option<Duration>,
    },

    /// A collaborator the handler needs is not wired up. Deployment bug;
    /// retrying the job will not install the dependency.
    #[error("missing dependency: {message}")]
    MissingDependency { message: String },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into(), source: None }
    }

    pub fn temporary(message: impl Into<String>) -> Self {
        Self::Temporary { message: message.into(), source: None }
    }

    pub fn temporary_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Temporary {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited { message: message.into(), retry_after }
    }

    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self::MissingDependency { message: message.into() }
    }

    /// Collapse the variant into the category the consume loop acts on.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Temporary { .. } => ErrorCategory::Temporary,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Validation { .. } | Self::Permanent { .. } | Self::MissingDependency { .. } => {
                ErrorCategory::Permanent
            }
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.category() == ErrorCategory::Permanent
    }

    /// The provider's pushback interval, when one exists.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation { message: err.to_string() }
    }
}

impl From<crate::ValidationError> for PipelineError {
    fn from(err: crate::ValidationError) -> Self {
        Self::Validation { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(
            PipelineError::temporary("io").category(),
            ErrorCategory::Temporary
        );
        assert_eq!(
            PipelineError::rate_limited("429", None).category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            PipelineError::permanent("bad").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            PipelineError::validation("shape").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            PipelineError::missing_dependency("no directory").category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn retry_after_only_on_rate_limits() {
        let pushback = Duration::from_secs(7);
        assert_eq!(
            PipelineError::rate_limited("slow down", Some(pushback)).retry_after(),
            Some(pushback)
        );
        assert_eq!(PipelineError::temporary("blip").retry_after(), None);
    }

    #[test]
    fn json_errors_are_validation() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(PipelineError::from(err).is_permanent());
    }
}
