use std::time::Duration;

/// Exponential delay schedule: `base`, doubled per attempt, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms))
    }
}

/// How the client retries transport failures and 5xx responses.
///
/// `max_retries` counts attempts after the first one, so the default policy
/// sends a request at most four times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::immediate(0)
    }

    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::new(Duration::ZERO, Duration::ZERO),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_doubles_from_half_a_second() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..policy.max_retries)
            .map(|attempt| policy.backoff.delay(attempt))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
    }

    #[test]
    fn delay_is_capped_at_max() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(4));
        assert_eq!(backoff.delay(10), Duration::from_secs(4));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(4));
    }

    #[test]
    fn immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(5);
        assert_eq!(policy.backoff.delay(4), Duration::ZERO);
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
