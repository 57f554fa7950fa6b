use std::time::Duration;

use rand::Rng;
use reqwest::header::RETRY_AFTER;

use crate::request::RequestDescriptor;
use crate::transport::{FailureKind, TransportFailure};

const MAX_BACKOFF_EXPONENT: u32 = 16;
const JITTER_MIN: f64 = 0.5;
const JITTER_MAX: f64 = 1.5;

/// Decides whether a failed attempt is resubmitted and how long to wait.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on every further retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Statuses retried regardless of class (4xx or 5xx).
    pub retryable_statuses: Vec<u16>,
    /// Failure kinds retried when no response was received.
    pub retryable_failures: Vec<FailureKind>,
    /// Wait for a server-sent `Retry-After` (in seconds) instead of the
    /// computed backoff. Off by default.
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            retryable_failures: vec![
                FailureKind::ConnectTimeout,
                FailureKind::SendTimeout,
                FailureKind::ReceiveTimeout,
                FailureKind::ConnectionError,
            ],
            respect_retry_after: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Whether the failure belongs to a retryable category, ignoring the
    /// attempt budget.
    pub fn is_retryable(&self, failure: &TransportFailure) -> bool {
        if failure.kind == FailureKind::Cancelled {
            return false;
        }
        match failure.status() {
            Some(status) => self.retryable_statuses.contains(&status),
            None => self.retryable_failures.contains(&failure.kind),
        }
    }

    /// Whether `request`, having just failed with `failure`, gets another
    /// attempt. The request's own override of the attempt cap wins.
    pub fn should_retry(&self, request: &RequestDescriptor, failure: &TransportFailure) -> bool {
        let max_attempts = request.options.max_attempts.unwrap_or(self.max_attempts);
        request.attempt < max_attempts && self.is_retryable(failure)
    }

    /// Delay before `attempt` (1-indexed) for a given jitter factor.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (base_ms * f64::from(1u32 << exp) * jitter).clamp(0.0, max_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// Exponential backoff with a uniform jitter factor in `[0.5, 1.5]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay before `attempt`. When enabled, a `Retry-After` header wins,
    /// kept within `[base_delay, max_delay]`.
    pub fn delay_for(&self, attempt: u32, failure: &TransportFailure) -> Duration {
        if self.respect_retry_after {
            if let Some(delay) = retry_after(failure) {
                return delay.clamp(self.base_delay, self.max_delay.max(self.base_delay));
            }
        }
        self.backoff_delay(attempt)
    }
}

fn retry_after(failure: &TransportFailure) -> Option<Duration> {
    let value = failure.response.as_ref()?.headers.get(RETRY_AFTER)?;
    let seconds = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderValue, RETRY_AFTER};
    use reqwest::{Method, StatusCode};

    use super::RetryPolicy;
    use crate::request::RequestDescriptor;
    use crate::transport::{FailureKind, RawResponse, TransportFailure};

    fn status_failure(status: u16) -> TransportFailure {
        TransportFailure::bad_response(RawResponse::new(
            StatusCode::from_u16(status).expect("valid status"),
            "",
        ))
    }

    #[test]
    fn retryable_statuses_apply_to_client_and_server_errors() {
        let policy = RetryPolicy::default();
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(policy.is_retryable(&status_failure(status)), "{status}");
        }
        for status in [400, 401, 403, 404, 422, 501] {
            assert!(!policy.is_retryable(&status_failure(status)), "{status}");
        }
    }

    #[test]
    fn transport_failures_without_status_use_kind_set() {
        let policy = RetryPolicy::default();
        for kind in [
            FailureKind::ConnectTimeout,
            FailureKind::SendTimeout,
            FailureKind::ReceiveTimeout,
            FailureKind::ConnectionError,
        ] {
            assert!(policy.is_retryable(&TransportFailure::new(kind, "x")));
        }
        assert!(!policy.is_retryable(&TransportFailure::new(FailureKind::BadCertificate, "x")));
        assert!(!policy.is_retryable(&TransportFailure::new(FailureKind::Unknown, "x")));
        assert!(!policy.is_retryable(&TransportFailure::cancelled()));
    }

    #[test]
    fn attempt_budget_gates_retry() {
        let policy = RetryPolicy::default();
        let failure = TransportFailure::new(FailureKind::ReceiveTimeout, "slow");
        let mut request = RequestDescriptor::new(Method::GET, "/users/1");

        for attempt in 0..3 {
            request.attempt = attempt;
            assert!(policy.should_retry(&request, &failure));
        }
        request.attempt = 3;
        assert!(!policy.should_retry(&request, &failure));

        request.attempt = 0;
        request.options.max_attempts = Some(0);
        assert!(!policy.should_retry(&request, &failure));
    }

    #[test]
    fn backoff_stays_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5u32 {
            let nominal = 1_000u64 * 2u64.pow(attempt - 1);
            let low = policy.delay_with_jitter(attempt, 0.5);
            let high = policy.delay_with_jitter(attempt, 1.5);
            assert_eq!(low, Duration::from_millis(nominal / 2));
            assert_eq!(high, Duration::from_millis((nominal * 3 / 2).min(30_000)));

            for _ in 0..50 {
                let delay = policy.backoff_delay(attempt);
                assert!(delay >= low && delay <= high, "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_secs(10));
        assert_eq!(policy.delay_with_jitter(3, 1.0), Duration::from_secs(30));
        assert_eq!(policy.delay_with_jitter(40, 1.5), Duration::from_secs(30));
    }

    fn rate_limited(retry_after: &'static str) -> TransportFailure {
        let mut response = RawResponse::new(StatusCode::TOO_MANY_REQUESTS, "");
        response
            .headers
            .insert(RETRY_AFTER, HeaderValue::from_static(retry_after));
        TransportFailure::bad_response(response)
    }

    #[test]
    fn retry_after_is_ignored_by_default() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(100));
        for header in ["0", "2"] {
            let delay = policy.delay_for(1, &rate_limited(header));
            assert!(
                delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150),
                "Retry-After {header}: {delay:?}"
            );
        }
    }

    #[test]
    fn retry_after_overrides_backoff_when_enabled() {
        let policy = RetryPolicy::default().with_retry_after(true);
        assert_eq!(policy.delay_for(1, &rate_limited("2")), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, &rate_limited("120")), Duration::from_secs(30));
    }

    #[test]
    fn zero_retry_after_still_waits_base_delay() {
        let policy = RetryPolicy::default()
            .with_retry_after(true)
            .with_base_delay(Duration::from_millis(250));
        assert_eq!(
            policy.delay_for(1, &rate_limited("0")),
            Duration::from_millis(250)
        );
    }
}
