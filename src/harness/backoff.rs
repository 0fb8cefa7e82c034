use std::time::Duration;

use rand::Rng;

/// Quadratic backoff with uniform jitter: `attempt² × unit + uniform(0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    unit: Duration,
    jitter: Duration,
}

impl Backoff {
    pub fn new(unit_ms: u64, jitter_ms: u64) -> Self {
        Self {
            unit: Duration::from_millis(unit_ms),
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        let squared = attempt.saturating_mul(attempt);
        self.unit.saturating_mul(squared)
    }

    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        self.base_delay(attempt) + jitter(self.jitter, rng)
    }
}

/// Uniform delay in `[0, max)` at millisecond granularity.
pub fn jitter(max: Duration, rng: &mut impl Rng) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..max_ms))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::{SeedableRng, rngs::StdRng};

    use super::Backoff;

    #[test]
    fn base_delay_is_quadratic_in_attempt() {
        let backoff = Backoff::new(20, 100);
        assert_eq!(backoff.base_delay(0), Duration::ZERO);
        assert_eq!(backoff.base_delay(1), Duration::from_millis(20));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(180));
        assert_eq!(backoff.base_delay(19), Duration::from_millis(7_220));
    }

    #[test]
    fn every_delay_covers_its_deterministic_component_and_grows_with_attempt() {
        let backoff = Backoff::new(20, 100);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..20 {
            let delay = backoff.delay(attempt, &mut rng);
            assert!(delay >= backoff.base_delay(attempt));
            assert!(delay < backoff.base_delay(attempt) + Duration::from_millis(100));
            assert!(delay >= backoff.base_delay(attempt - 1));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let backoff = Backoff::new(10, 0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(backoff.delay(4, &mut rng), Duration::from_millis(160));
    }
}
