//! Dead-letter stream management.

use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BrokerError;

/// Writes terminally failed jobs to the per-queue `<STREAM>_DLQ` stream.
///
/// The DLQ is append-only from the pipeline's point of view; replay is an
/// operator action, not something the worker does.
pub struct DlqManager {
    jetstream: Context,
    dlq_stream: String,
    dlq_subject: String,
}

impl DlqManager {
    pub fn new(jetstream: Context, dlq_stream: &str) -> Self {
        let dlq_subject = format!("{}.failed", dlq_stream.to_lowercase());
        Self {
            jetstream,
            dlq_stream: dlq_stream.to_string(),
            dlq_subject,
        }
    }

    /// Ensure the DLQ stream exists.
    pub async fn ensure_stream(&self) -> Result<(), BrokerError> {
        match self.jetstream.get_stream(&self.dlq_stream).await {
            Ok(_) => {
                debug!(stream = %self.dlq_stream, "DLQ stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(stream = %self.dlq_stream, "Creating DLQ stream");

                self.jetstream
                    .create_stream(StreamConfig {
                        name: self.dlq_stream.clone(),
                        subjects: vec![self.dlq_subject.clone()],
                        max_messages: 10_000,
                        max_age: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
                        ..Default::default()
                    })
                    .await
                    .map_err(BrokerError::from_jetstream_error)?;

                info!(stream = %self.dlq_stream, "DLQ stream created");
                Ok(())
            }
        }
    }

    /// Record a terminally failed delivery.
    pub async fn record(&self, entry: &DlqEntry) -> Result<u64, BrokerError> {
        let payload = serde_json::to_vec(entry)?;

        let ack = self
            .jetstream
            .publish(self.dlq_subject.clone(), payload.into())
            .await
            .map_err(|e| BrokerError::publish_error(e.to_string()))?
            .await
            .map_err(|e| BrokerError::publish_error(e.to_string()))?;

        debug!(
            job_id = entry.job_id.as_deref().unwrap_or("unknown"),
            stream = %self.dlq_stream,
            sequence = ack.sequence,
            "Recorded dead-lettered job"
        );

        Ok(ack.sequence)
    }
}

/// Entry stored in the dead-letter stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Job ID, when the payload parsed far enough to have one.
    pub job_id: Option<String>,
    /// The full job body as it arrived. Unparseable payloads are stored
    /// as a JSON string so nothing is lost.
    pub job_data: Value,
    /// Why the job was dead-lettered.
    pub error: String,
    /// Retry counter of the failed delivery (transport header value).
    pub retry_count: u32,
    /// When the worker gave up.
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(job_id: Option<String>, job_data: Value, error: &str, retry_count: u32) -> Self {
        Self {
            job_id,
            job_data,
            error: error.to_string(),
            retry_count,
            failed_at: Utc::now(),
        }
    }

    /// Entry for a payload that never parsed as JSON.
    pub fn unparseable(raw: &[u8], error: &str) -> Self {
        Self::new(
            None,
            Value::String(String::from_utf8_lossy(raw).into_owned()),
            error,
            0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unparseable_payload_preserved_as_string() {
        let entry = DlqEntry::unparseable(b"{broken", "expected value at line 1");
        assert_eq!(entry.job_id, None);
        assert_eq!(entry.job_data, json!("{broken"));
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn entries_round_trip() {
        let entry = DlqEntry::new(Some("j1".into()), json!({ "jobId": "j1" }), "boom", 3);
        let decoded: DlqEntry =
            serde_json::from_slice(&serde_json::to_vec(&entry).unwrap()).unwrap();
        assert_eq!(decoded.job_id.as_deref(), Some("j1"));
        assert_eq!(decoded.retry_count, 3);
    }
}
