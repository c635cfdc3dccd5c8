//! Retry policy for upstream calls

use std::collections::BTreeSet;
use std::time::Duration;

use super::error::UpstreamError;

/// How the wait between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `base_delay`
    Fixed,
    /// Wait `base_delay * 2^(attempt - 1)`
    Exponential,
}

/// Bounded retry with backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    pub backoff: Backoff,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    /// HTTP statuses worth repeating
    pub retryable_statuses: BTreeSet<u16>,
    /// Whether an upstream `Retry-After` hint replaces the computed delay
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_delay: Duration::from_secs(60),
            retryable_statuses: [429, 500, 502, 503, 504].into_iter().collect(),
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Policy making `retries` additional attempts after the first
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            base_delay,
            ..Default::default()
        }
    }

    /// Single attempt, no retry
    pub fn no_retry() -> Self {
        Self::default()
    }

    /// Sets the backoff curve
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the upper bound on a single wait
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enables or disables honouring `Retry-After`
    pub fn with_retry_after(mut self, honor: bool) -> Self {
        self.honor_retry_after = honor;
        self
    }

    /// Total attempts, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether `error` deserves another attempt
    ///
    /// Network failures and empty bodies are repeated, HTTP errors only when
    /// their status is listed. An unparseable body is returned as is.
    pub fn should_retry(&self, error: &UpstreamError) -> bool {
        match error {
            UpstreamError::Network(_) | UpstreamError::EmptyResponse => true,
            UpstreamError::Http { status, .. } => self.retryable_statuses.contains(status),
            UpstreamError::InvalidPayload(_) => false,
        }
    }

    /// Wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, error: &UpstreamError) -> Duration {
        if self.honor_retry_after {
            if let Some(hint) = error.retry_after() {
                return hint.min(self.max_delay);
            }
        }
        let computed = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << exponent)
            }
        };
        computed.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 1);
        assert!(policy.honor_retry_after);
        assert!(policy.retryable_statuses.contains(&502));
        assert!(policy.retryable_statuses.contains(&429));
    }

    #[test]
    fn test_new_counts_first_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 4);
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let err = UpstreamError::Network("x".into());

        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(2))
            .with_backoff(Backoff::Exponential)
            .with_max_delay(Duration::from_secs(10));
        let err = UpstreamError::Network("x".into());

        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4, &err), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40, &err), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let err = UpstreamError::http(429, "", Some(Duration::from_secs(5)));

        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(5));

        let ignoring = policy.with_retry_after(false);
        assert_eq!(ignoring.delay_for(1, &err), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = RetryPolicy::new(2, Duration::ZERO).with_max_delay(Duration::from_secs(30));
        let err = UpstreamError::http(503, "", Some(Duration::from_secs(3600)));

        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(1, Duration::ZERO);

        assert!(policy.should_retry(&UpstreamError::Network("x".into())));
        assert!(policy.should_retry(&UpstreamError::EmptyResponse));
        assert!(policy.should_retry(&UpstreamError::http(502, "", None)));
        assert!(!policy.should_retry(&UpstreamError::http(404, "", None)));
        assert!(!policy.should_retry(&UpstreamError::http(501, "", None)));
        assert!(!policy.should_retry(&UpstreamError::InvalidPayload("x".into())));
    }
}
