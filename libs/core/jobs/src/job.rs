//! The job contract: typed unit of asynchronous work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Closed set of job types the platform enqueues.
///
/// Producers and every consumer share this one canonical list; an unknown
/// wire string fails deserialization. Adding a variant without a handler
/// arm in a pipeline dispatch is a compile error, not a runtime throw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// One-time password email for login/KYC flows.
    SendOtp,
    /// Generic transactional email.
    SendEmail,
    /// Someone liked a post.
    PostLiked,
    /// Someone commented on a post.
    CommentAdded,
    /// Someone followed a user.
    UserFollowed,
    /// A post was removed by moderation.
    PostRemoved,
    /// A user received a moderation warning.
    UserWarned,
    /// A fundraising event was updated.
    EventUpdated,
    /// A fundraising event was removed.
    EventRemoved,
    /// A fundraising event started.
    EventStarted,
    /// Escrowed donations crossed the release threshold.
    EscrowThresholdReached,
    /// Escrow release was approved by vote.
    EscrowApproved,
}

impl JobType {
    /// Every variant, in wire order. Used by validation tests and tooling.
    pub const ALL: [JobType; 12] = [
        JobType::SendOtp,
        JobType::SendEmail,
        JobType::PostLiked,
        JobType::CommentAdded,
        JobType::UserFollowed,
        JobType::PostRemoved,
        JobType::UserWarned,
        JobType::EventUpdated,
        JobType::EventRemoved,
        JobType::EventStarted,
        JobType::EscrowThresholdReached,
        JobType::EscrowApproved,
    ];

    /// Wire name (SCREAMING_SNAKE_CASE).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SendOtp => "SEND_OTP",
            JobType::SendEmail => "SEND_EMAIL",
            JobType::PostLiked => "POST_LIKED",
            JobType::CommentAdded => "COMMENT_ADDED",
            JobType::UserFollowed => "USER_FOLLOWED",
            JobType::PostRemoved => "POST_REMOVED",
            JobType::UserWarned => "USER_WARNED",
            JobType::EventUpdated => "EVENT_UPDATED",
            JobType::EventRemoved => "EVENT_REMOVED",
            JobType::EventStarted => "EVENT_STARTED",
            JobType::EscrowThresholdReached => "ESCROW_THRESHOLD_REACHED",
            JobType::EscrowApproved => "ESCROW_APPROVED",
        }
    }

    /// Parse a wire name back into the enum.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// The pipeline queue this job type is routed to.
    pub fn queue(&self) -> Queue {
        match self {
            JobType::SendOtp | JobType::SendEmail => Queue::Mail,
            _ => Queue::Notification,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two pipeline queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Mail,
    Notification,
}

impl Queue {
    /// Default subject for this queue; overridable via environment.
    pub fn default_subject(&self) -> &'static str {
        match self {
            Queue::Mail => "mail.send",
            Queue::Notification => "notification.create",
        }
    }
}

/// Where a job originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Api,
    System,
    Admin,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Api => "api",
            JobSource::System => "system",
            JobSource::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api" => Some(JobSource::Api),
            "system" => Some(JobSource::System),
            "admin" => Some(JobSource::Admin),
            _ => None,
        }
    }
}

/// Job metadata. Unknown fields are preserved across the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    /// Correlation ID for tracing a job back to the request that enqueued it.
    pub request_id: String,

    /// Acting user, if any.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Informational retry counter in the body. The transport header is the
    /// authoritative counter; the body never mutates across redeliveries.
    #[serde(default)]
    pub retry_count: u32,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Where the job originated.
    pub source: JobSource,

    /// Extra producer-specific fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl JobMeta {
    fn new(source: JobSource) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            retry_count: 0,
            created_at: Utc::now(),
            source,
            extra: serde_json::Map::new(),
        }
    }
}

/// A typed unit of asynchronous work.
///
/// Created once by a producer; the broker owns the durable copy between
/// enqueue and ack. Consumers hold only a transient delivery handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier, assigned at creation, immutable.
    pub job_id: String,

    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Type-specific payload; always a plain JSON object.
    pub payload: Value,

    pub meta: JobMeta,
}

impl Job {
    /// Construct a job with generated `job_id`, `request_id` and `created_at`.
    ///
    /// Fails fast if the payload is not a plain object.
    pub fn new(job_type: JobType, payload: Value, source: JobSource) -> Result<Self, ValidationError> {
        if !payload.is_object() {
            return Err(ValidationError::Payload);
        }
        Ok(Self {
            job_id: Uuid::new_v4().to_string(),
            job_type,
            payload,
            meta: JobMeta::new(source),
        })
    }

    /// Set the acting user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.meta.user_id = Some(user_id.into());
        self
    }

    /// Override the correlation ID (e.g. to propagate one from the request).
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.meta.request_id = request_id.into();
        self
    }

    /// Re-check the invariants of an already-constructed job.
    ///
    /// Types enforce most of the contract; this guards the parts they
    /// cannot (payload object-ness). Pure, never mutates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.payload.is_object() {
            return Err(ValidationError::Payload);
        }
        if self.job_id.is_empty() {
            return Err(ValidationError::JobId);
        }
        if self.meta.request_id.is_empty() {
            return Err(ValidationError::RequestId);
        }
        Ok(())
    }

    /// Validate untyped wire data and decode it into a `Job`.
    ///
    /// Used on the consuming side, where the job arrives as raw JSON.
    /// Checks run in a fixed order so the first violated invariant is the
    /// one reported. A failure here is a permanent error: a malformed job
    /// can never become valid by retrying.
    pub fn validate_wire(value: &Value) -> Result<Job, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        if !obj.get("jobId").map(Value::is_string).unwrap_or(false) {
            return Err(ValidationError::JobId);
        }

        let type_str = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ValidationError::TypeField)?;
        if JobType::parse(type_str).is_none() {
            return Err(ValidationError::UnknownType(type_str.to_string()));
        }

        if !obj.get("payload").map(Value::is_object).unwrap_or(false) {
            return Err(ValidationError::Payload);
        }

        let meta = obj
            .get("meta")
            .and_then(Value::as_object)
            .ok_or(ValidationError::Meta)?;

        if !meta.get("requestId").map(Value::is_string).unwrap_or(false) {
            return Err(ValidationError::RequestId);
        }

        let created_at = meta
            .get("createdAt")
            .and_then(Value::as_str)
            .ok_or(ValidationError::CreatedAt)?;
        if DateTime::parse_from_rfc3339(created_at).is_err() {
            return Err(ValidationError::CreatedAt);
        }

        let source = meta
            .get("source")
            .and_then(Value::as_str)
            .ok_or(ValidationError::Source)?;
        if JobSource::parse(source).is_none() {
            return Err(ValidationError::Source);
        }

        match meta.get("userId") {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => return Err(ValidationError::UserId),
        }

        if let Some(rc) = meta.get("retryCount") {
            if !rc.as_u64().map(|_| true).unwrap_or(false) {
                return Err(ValidationError::RetryCount);
            }
        }

        serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::Decode(e.to_string()))
    }
}

/// The first invariant a malformed job violates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("job is not an object")]
    NotAnObject,
    #[error("jobId must be a non-empty string")]
    JobId,
    #[error("type missing or not a string")]
    TypeField,
    #[error("unknown job type: {0}")]
    UnknownType(String),
    #[error("payload must be a plain object")]
    Payload,
    #[error("meta must be an object")]
    Meta,
    #[error("meta.requestId must be a non-empty string")]
    RequestId,
    #[error("meta.createdAt must be an RFC 3339 timestamp")]
    CreatedAt,
    #[error("meta.source must be one of api|system|admin")]
    Source,
    #[error("meta.userId must be a string or null")]
    UserId,
    #[error("meta.retryCount must be a non-negative integer")]
    RetryCount,
    #[error("job failed to decode: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(job: &Job) -> Value {
        serde_json::to_value(job).unwrap()
    }

    #[test]
    fn created_jobs_revalidate_clean() {
        for job_type in JobType::ALL {
            let job = Job::new(job_type, json!({ "k": "v" }), JobSource::Api).unwrap();
            assert!(job.validate().is_ok());

            let decoded = Job::validate_wire(&wire(&job)).unwrap();
            assert_eq!(decoded.job_id, job.job_id);
            assert_eq!(decoded.job_type, job_type);
        }
    }

    #[test]
    fn validation_is_idempotent() {
        let job = Job::new(JobType::PostLiked, json!({ "postId": "P1" }), JobSource::Api).unwrap();
        let before = wire(&job);

        let first = Job::validate_wire(&before).unwrap();
        let second = Job::validate_wire(&before).unwrap();

        // Validation never mutates: the wire form is unchanged and both
        // decodes agree.
        assert_eq!(before, wire(&job));
        assert_eq!(wire(&first), wire(&second));
    }

    #[test]
    fn non_object_payload_rejected_at_creation() {
        assert_eq!(
            Job::new(JobType::SendOtp, json!([1, 2]), JobSource::Api).unwrap_err(),
            ValidationError::Payload
        );
        assert_eq!(
            Job::new(JobType::SendOtp, Value::Null, JobSource::Api).unwrap_err(),
            ValidationError::Payload
        );
    }

    #[test]
    fn unknown_type_rejected_on_wire() {
        let mut value = wire(&Job::new(JobType::PostLiked, json!({}), JobSource::Api).unwrap());
        value["type"] = json!("POST_SHARED");

        assert_eq!(
            Job::validate_wire(&value).unwrap_err(),
            ValidationError::UnknownType("POST_SHARED".to_string())
        );
    }

    #[test]
    fn checks_run_in_contract_order() {
        assert_eq!(
            Job::validate_wire(&json!("nope")).unwrap_err(),
            ValidationError::NotAnObject
        );
        assert_eq!(
            Job::validate_wire(&json!({})).unwrap_err(),
            ValidationError::JobId
        );
        assert_eq!(
            Job::validate_wire(&json!({ "jobId": "j1" })).unwrap_err(),
            ValidationError::TypeField
        );
        assert_eq!(
            Job::validate_wire(&json!({ "jobId": "j1", "type": "POST_LIKED" })).unwrap_err(),
            ValidationError::Payload
        );
        assert_eq!(
            Job::validate_wire(&json!({ "jobId": "j1", "type": "POST_LIKED", "payload": {} }))
                .unwrap_err(),
            ValidationError::Meta
        );
    }

    #[test]
    fn malformed_meta_fields_rejected() {
        let mut value = wire(&Job::new(JobType::PostLiked, json!({}), JobSource::Api).unwrap());

        value["meta"]["createdAt"] = json!("yesterday");
        assert_eq!(
            Job::validate_wire(&value).unwrap_err(),
            ValidationError::CreatedAt
        );

        value["meta"]["createdAt"] = json!("2026-08-25T12:00:00Z");
        value["meta"]["source"] = json!("webhook");
        assert_eq!(
            Job::validate_wire(&value).unwrap_err(),
            ValidationError::Source
        );

        value["meta"]["source"] = json!("api");
        value["meta"]["userId"] = json!(42);
        assert_eq!(
            Job::validate_wire(&value).unwrap_err(),
            ValidationError::UserId
        );

        value["meta"]["userId"] = Value::Null;
        value["meta"]["retryCount"] = json!(-1);
        assert_eq!(
            Job::validate_wire(&value).unwrap_err(),
            ValidationError::RetryCount
        );
    }

    #[test]
    fn extra_meta_fields_preserved() {
        let mut value = wire(&Job::new(JobType::EventStarted, json!({}), JobSource::System).unwrap());
        value["meta"]["traceSpan"] = json!("abc123");

        let job = Job::validate_wire(&value).unwrap();
        assert_eq!(job.meta.extra.get("traceSpan"), Some(&json!("abc123")));

        // And they survive a round through the wire form.
        let rewired = serde_json::to_value(&job).unwrap();
        assert_eq!(rewired["meta"]["traceSpan"], json!("abc123"));
    }

    #[test]
    fn job_type_routing() {
        assert_eq!(JobType::SendOtp.queue(), Queue::Mail);
        assert_eq!(JobType::SendEmail.queue(), Queue::Mail);
        assert_eq!(JobType::PostLiked.queue(), Queue::Notification);
        assert_eq!(JobType::EscrowApproved.queue(), Queue::Notification);
    }

    #[test]
    fn job_type_wire_names_round_trip() {
        for t in JobType::ALL {
            assert_eq!(JobType::parse(t.as_str()), Some(t));
        }
        assert_eq!(JobType::parse("SEND_SMS"), None);
    }
}
