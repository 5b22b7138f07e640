//! Retry and backoff policy shared by every hosting API call
//!
//! One policy object decides, per failed attempt, whether to try again and
//! how long to wait:
//!
//! - 5xx in the retryable set and transport failures back off exponentially
//! - 429, and 403 carrying a rate-limit signal, wait for `Retry-After` or the
//!   quota reset time, clamped to `[min_rate_limit_wait, max_rate_limit_wait]`
//! - everything else fails immediately

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Backoff {
    /// Delay after the given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(20),
            multiplier: 2.0,
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Retry policy parameterised by retryable statuses, attempt budget and backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Server errors retried with backoff
    pub retryable_statuses: Vec<u16>,
    /// Statuses that may signal an exhausted quota
    pub rate_limit_statuses: Vec<u16>,
    pub backoff: Backoff,
    pub min_rate_limit_wait: Duration,
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retryable_statuses: vec![500, 502, 503, 504],
            rate_limit_statuses: vec![403, 429],
            backoff: Backoff::default(),
            min_rate_limit_wait: Duration::from_secs(1),
            max_rate_limit_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Decide after an HTTP error response on the given attempt (1-indexed)
    pub fn decide_status(
        &self,
        attempt: u32,
        status: u16,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        if self.rate_limit_statuses.contains(&status) {
            let signalled = rate_limit_wait(headers, now);
            // A bare 403 is a permission problem, not a quota problem
            if status == 403 && signalled.is_none() {
                return RetryDecision::GiveUp;
            }
            let wait = signalled.unwrap_or_else(|| self.backoff.delay_for_attempt(attempt));
            return RetryDecision::Retry(self.clamp_rate_limit_wait(wait));
        }

        if self.retryable_statuses.contains(&status) {
            return RetryDecision::Retry(self.backoff.delay_for_attempt(attempt));
        }

        RetryDecision::GiveUp
    }

    /// Decide after a transport failure on the given attempt (1-indexed)
    pub fn decide_transport(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.backoff.delay_for_attempt(attempt))
        }
    }

    fn clamp_rate_limit_wait(&self, wait: Duration) -> Duration {
        wait.clamp(self.min_rate_limit_wait, self.max_rate_limit_wait)
    }
}

/// Wait signalled by rate-limit headers, unclamped
///
/// `Retry-After` (integer seconds) wins; otherwise, when
/// `x-ratelimit-remaining` reads zero, the time until `x-ratelimit-reset`.
pub fn rate_limit_wait(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(seconds) = header_u64(headers, "retry-after") {
        return Some(Duration::from_secs(seconds));
    }

    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    if remaining != 0 {
        return None;
    }

    let reset_epoch = header_u64(headers, "x-ratelimit-reset")?;
    let until_reset = (reset_epoch as i64).saturating_sub(now.timestamp()).max(0);
    Some(Duration::from_secs(until_reset as u64))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(20));
    }

    #[test]
    fn test_retry_after_header_wins() {
        let h = headers(&[("retry-after", "7"), ("x-ratelimit-remaining", "0")]);
        assert_eq!(rate_limit_wait(&h, now()), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_reset_time_used_when_quota_exhausted() {
        let reset = (now().timestamp() + 42).to_string();
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &reset)]);
        assert_eq!(rate_limit_wait(&h, now()), Some(Duration::from_secs(42)));
    }

    #[test]
    fn test_no_signal_when_quota_remains() {
        let reset = (now().timestamp() + 42).to_string();
        let h = headers(&[("x-ratelimit-remaining", "12"), ("x-ratelimit-reset", &reset)]);
        assert_eq!(rate_limit_wait(&h, now()), None);
    }

    #[test]
    fn test_rate_limit_wait_is_clamped() {
        let policy = RetryPolicy::default();

        let far = (now().timestamp() + 3600).to_string();
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &far)]);
        assert_eq!(
            policy.decide_status(1, 403, &h, now()),
            RetryDecision::Retry(Duration::from_secs(60))
        );

        let past = (now().timestamp() - 10).to_string();
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &past)]);
        assert_eq!(
            policy.decide_status(1, 429, &h, now()),
            RetryDecision::Retry(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_plain_forbidden_is_not_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide_status(1, 403, &HeaderMap::new(), now()),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_too_many_requests_without_headers_uses_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide_status(2, 429, &HeaderMap::new(), now()),
            RetryDecision::Retry(Duration::from_secs(4))
        );
    }

    #[test]
    fn test_server_errors_retry_until_budget_spent() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(matches!(
            policy.decide_status(1, 502, &HeaderMap::new(), now()),
            RetryDecision::Retry(_)
        ));
        assert!(matches!(
            policy.decide_status(2, 503, &HeaderMap::new(), now()),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            policy.decide_status(3, 503, &HeaderMap::new(), now()),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_other_client_errors_fail_immediately() {
        let policy = RetryPolicy::default();
        for status in [400, 401, 404, 409, 410, 422] {
            assert_eq!(
                policy.decide_status(1, status, &HeaderMap::new(), now()),
                RetryDecision::GiveUp,
                "status {} should not be retried",
                status
            );
        }
    }

    #[test]
    fn test_transport_failures_share_budget() {
        let policy = RetryPolicy::default().with_max_attempts(2);
        assert!(matches!(policy.decide_transport(1), RetryDecision::Retry(_)));
        assert_eq!(policy.decide_transport(2), RetryDecision::GiveUp);
    }
}
