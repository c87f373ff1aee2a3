//! Retry delay policy.
//!
//! Each failure doubles the entity's backoff, capped at the configured
//! maximum, and the actual delay is drawn uniformly from `[0, backoff]`
//! (full jitter) so entities that failed together do not retry together.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(max: Duration) -> Self {
        Self {
            max: max.max(Duration::from_secs(1)),
        }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Backoff after one more failure.
    pub fn escalate(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max).max(Duration::from_secs(1))
    }

    /// Full-jitter delay in `[0, backoff]`, whole milliseconds.
    pub fn jittered<R: Rng + ?Sized>(&self, backoff: Duration, rng: &mut R) -> Duration {
        let ceiling = backoff.min(self.max).as_millis() as u64;
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_escalate_doubles_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1800));
        let mut backoff = Duration::from_secs(300);
        let mut seen = Vec::new();
        for _ in 0..4 {
            backoff = policy.escalate(backoff);
            seen.push(backoff.as_secs());
        }
        assert_eq!(seen, vec![600, 1200, 1800, 1800]);
    }

    #[test]
    fn test_interval_above_cap_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(60));
        assert_eq!(policy.escalate(Duration::from_secs(900)), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::new(Duration::from_secs(1800));
        let mut rng = StdRng::seed_from_u64(7);
        let backoff = Duration::from_secs(120);
        let delays: Vec<_> = (0..200).map(|_| policy.jittered(backoff, &mut rng)).collect();

        assert!(delays.iter().all(|d| *d <= backoff));
        // Jitter actually spreads retries out.
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        assert!(*max - *min > Duration::from_secs(60));
    }
}
