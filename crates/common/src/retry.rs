use std::time::Duration;

/// Exponential backoff schedule for reconnect attempts.
///
/// Delay for attempt `n` is `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Attempts before giving up
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Whether `attempt` (zero-based) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff() {
        let backoff = Backoff::default();
        assert_eq!(backoff.max_attempts, 5);
        assert_eq!(backoff.base_delay, Duration::from_millis(200));
        assert_eq!(backoff.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let backoff = Backoff::default();

        // 200ms * 2^0 = 200ms
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(200));
        // 200ms * 2^1 = 400ms
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(400));
        // 200ms * 2^4 = 3200ms
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(3200));
        // 200ms * 2^5 = 6400ms, capped at 5s
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(5));
        // Huge attempts saturate instead of overflowing
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn test_attempt_budget() {
        let backoff = Backoff::new(2, Duration::from_millis(10), Duration::from_millis(50));
        assert!(backoff.allows(0));
        assert!(backoff.allows(1));
        assert!(!backoff.allows(2));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(50));
    }
}
