//! Transport headers carrying retry state.
//!
//! The retry counter lives in message headers, not in the job body: the
//! logical job is immutable from enqueue to completion, and a republished
//! attempt is byte-identical to the original except for its headers.

use async_nats::HeaderMap;
use chrono::Utc;

/// How many retries this delivery has already consumed.
pub const RETRY_COUNT: &str = "X-Retry-Count";

/// When the republishing worker re-enqueued the job (RFC 3339).
pub const REPUBLISHED_AT: &str = "X-Republished-At";

/// Read the retry counter from a delivery's headers.
///
/// Absent or unparseable values read as 0, so first deliveries and
/// messages from non-conforming producers enter the loop with a full
/// retry budget rather than being dropped.
pub fn retry_count(headers: Option<&HeaderMap>) -> u32 {
    headers
        .and_then(|h| h.get(RETRY_COUNT))
        .and_then(|v| v.as_str().parse().ok())
        .unwrap_or(0)
}

/// Headers for the first enqueue of a job.
pub fn initial_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_COUNT, "0");
    headers
}

/// Headers for a republished retry attempt.
///
/// Carries every header of the failed delivery forward, then overwrites
/// the retry counter and stamps the republish time.
pub fn next_attempt_headers(previous: Option<&HeaderMap>, next_retry: u32) -> HeaderMap {
    let mut headers = previous.cloned().unwrap_or_default();
    headers.insert(RETRY_COUNT, next_retry.to_string());
    headers.insert(REPUBLISHED_AT, Utc::now().to_rfc3339());
    headers
}
