//! Retry policy: how many times, and how long between attempts.

use std::time::Duration;

use crate::ErrorCategory;

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay every attempt.
    Fixed(Duration),
    /// `min(base * 2^attempt, cap)`.
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Deterministic delay before the given attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(*cap, |d| d.min(*cap))
            }
        }
    }

    /// Delay plus up to 30% random jitter, so a burst of failures does
    /// not retry in lockstep.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        apply_jitter(self.delay(attempt))
    }
}

/// Add a random 0–30% on top of a delay.
pub(crate) fn apply_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let jitter = rand::thread_rng().gen_range(0.0..0.3);
    delay.mul_f64(1.0 + jitter)
}

/// Per-queue retry budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How many redeliveries a job gets before dead-lettering. The first
    /// delivery is not a retry; a budget of 3 allows 4 attempts total.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(30),
            },
        }
    }
}

impl RetryPolicy {
    /// Whether a failure at the given retry count earns another delivery.
    ///
    /// `retry_count` is how many retries the delivery has already
    /// consumed (the transport header value).
    pub fn should_retry(&self, retry_count: u32, category: ErrorCategory) -> bool {
        if category == ErrorCategory::Permanent {
            return false;
        }
        retry_count < self.max_retries
    }

    /// Delay before the next delivery for a failure at `retry_count`.
    ///
    /// Rate-limit pushback from the provider, when present, overrides
    /// the schedule (still jittered so a herd does not return at once).
    pub fn next_delay(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(pushback) => apply_jitter(pushback),
            None => self.backoff.delay_with_jitter(retry_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_until_cap() {
        let b = Backoff::Exponential {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        };
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(2), Duration::from_secs(4));
        assert_eq!(b.delay(4), Duration::from_secs(16));
        assert_eq!(b.delay(5), Duration::from_secs(30));
        assert_eq!(b.delay(60), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_band() {
        let b = Backoff::Fixed(Duration::from_secs(10));
        for _ in 0..100 {
            let d = b.delay_with_jitter(0);
            assert!(d >= Duration::from_secs(10));
            assert!(d <= Duration::from_secs(13));
        }
    }

    #[test]
    fn permanent_never_retries() {
        let p = RetryPolicy::default();
        assert!(!p.should_retry(0, ErrorCategory::Permanent));
        assert!(p.should_retry(0, ErrorCategory::Temporary));
        assert!(p.should_retry(2, ErrorCategory::RateLimited));
    }

    #[test]
    fn budget_exhausts_at_max() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(2, ErrorCategory::Temporary));
        assert!(!p.should_retry(3, ErrorCategory::Temporary));
        assert!(!p.should_retry(10, ErrorCategory::RateLimited));
    }

    #[test]
    fn provider_pushback_overrides_schedule() {
        let p = RetryPolicy::default();
        let d = p.next_delay(0, Some(Duration::from_secs(60)));
        assert!(d >= Duration::from_secs(60));
        assert!(d <= Duration::from_secs(78));
    }
}
