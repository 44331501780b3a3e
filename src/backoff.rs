use std::time::Duration;

use rand::Rng;

/// Share of the delay that is randomized in both directions.
const JITTER: f64 = 0.2;

/// Exponential reconnection delay with jitter.
///
/// The n-th consecutive failure waits `min * 2^n`, capped at `max`, randomized by up to 20% and
/// never shorter than `min`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempts: 0,
        }
    }

    /// Replaces the bounds, keeping the failure count.
    pub(crate) fn set_bounds(&mut self, min: Duration, max: Duration) {
        self.min = min;
        self.max = max.max(min);
    }

    /// Number of failures since the last [`reset`](Self::reset).
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempts.min(31));
        self.attempts = self.attempts.saturating_add(1);

        let base = self.min.saturating_mul(factor).min(self.max);
        let jitter = rand::thread_rng().gen_range(-JITTER..=JITTER);
        let delay = Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + jitter)).unwrap_or(base);
        let ceiling = self.max.checked_add(self.max.div_f64(1.0 / JITTER)).unwrap_or(self.max);

        delay.clamp(self.min, ceiling)
    }

    /// Starts over after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_stay_bounded() {
        let min = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        let mut backoff = Backoff::new(min, max);

        let mut previous_base = Duration::ZERO;
        for attempt in 0..40 {
            let delay = backoff.next_delay();
            assert!(delay >= min, "attempt {attempt}: {delay:?}");
            assert!(delay <= max + max / 5, "attempt {attempt}: {delay:?}");

            let base = min.saturating_mul(2u32.saturating_pow(attempt.min(31))).min(max);
            assert!(base >= previous_base);
            assert!(delay >= base.mul_f64(0.79).max(min));
            previous_base = base;
        }
        assert_eq!(backoff.attempts(), 40);
    }

    #[test]
    fn test_reset() {
        let min = Duration::from_millis(10);
        let mut backoff = Backoff::new(min, Duration::from_secs(10));
        for _ in 0..5 {
            backoff.next_delay();
        }

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() < min.mul_f64(1.5));
    }

    #[test]
    fn test_set_bounds_keeps_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(20));
        backoff.next_delay();
        backoff.next_delay();

        backoff.set_bounds(Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(backoff.attempts(), 2);
        assert!(backoff.next_delay() >= Duration::from_secs(1));
    }

    #[test]
    fn test_max_below_min() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_millis(1));
        assert!(backoff.next_delay() >= Duration::from_secs(1));
    }
}
