use std::time::Duration;

/// Capped exponential backoff: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|a| backoff.next_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_never_exceeds_max_and_never_decreases() {
        let backoff = Backoff::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = backoff.next_delay(attempt);
            assert!(delay <= Duration::from_secs(30), "attempt {attempt}");
            assert!(delay >= previous, "attempt {attempt}");
            previous = delay;
        }
        assert_eq!(backoff.next_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_custom_policy() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(0), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(2), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(3), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(10), Duration::from_secs(2));
    }
}
