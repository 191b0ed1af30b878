//! Exponential backoff with jitter for push retries.

use std::time::Duration;

use rand::Rng;

/// Delay policy: `base * 2^attempt`, capped at `max`, minus up to `jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Backoff {
    /// Build a policy from its three parameters.
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter,
        }
    }

    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Jittered delay before retry number `attempt`. Never exceeds the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let spread = self.jitter.min(ceiling).as_millis() as u64;
        if spread == 0 {
            return ceiling;
        }
        let cut = rand::rng().random_range(0..=spread);
        ceiling.saturating_sub(Duration::from_millis(cut))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            Duration::ZERO,
        );
        let delays: Vec<_> = (0..6).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff.ceiling(400), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::new(
            Duration::from_millis(1_000),
            Duration::from_millis(30_000),
            Duration::from_millis(500),
        );
        for attempt in 0..10 {
            let ceiling = backoff.ceiling(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay <= ceiling);
                assert!(delay + Duration::from_millis(500) >= ceiling);
            }
        }
    }
}
