//! Exponential retry backoff with jitter.
//!
//! Pure function of the attempt counter: `min(base * 2^attempt, cap)` plus
//! a uniform jitter. The jitter is mandatory; synchronized retry storms are
//! worse than a few hundred extra milliseconds.

use std::time::Duration;

use rand::Rng;

/// Deterministic-modulo-jitter backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for attempt 0.
    pub base: Duration,

    /// Upper bound on the exponential component.
    pub cap: Duration,

    /// Jitter range; each delay gets `uniform(0, jitter)` added.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(300),
            jitter: Duration::from_millis(250),
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay before the next run of a job that has already
    /// been attempted `attempt + 1` times.
    ///
    /// attempt 0 => base, 1 => 2*base, 2 => 4*base, ... capped at `cap`,
    /// plus jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        // 2^20 * 2s is already far beyond any sane cap.
        let exponent = attempt.min(20);
        let multiplier = 2u32.saturating_pow(exponent);
        let exponential = self.base.saturating_mul(multiplier).min(self.cap);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exponential;
        }
        exponential + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_secs: u64, cap_secs: u64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(base_secs),
            cap: Duration::from_secs(cap_secs),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn delays_double_per_attempt() {
        let policy = no_jitter(2, 300);

        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(policy.delay(3), Duration::from_secs(16));
    }

    #[test]
    fn cap_bounds_large_attempts() {
        let policy = no_jitter(2, 300);

        assert_eq!(policy.delay(10), Duration::from_secs(300));
        assert_eq!(policy.delay(63), Duration::from_secs(300));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: Duration::from_millis(250),
        };

        for attempt in 0..8 {
            let exponential = Duration::from_secs(1 << attempt).min(Duration::from_secs(60));
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay >= exponential, "jitter must never shorten the delay");
                assert!(delay < exponential + Duration::from_millis(250));
            }
        }
    }

    #[test]
    fn jitter_varies_delays() {
        let policy = BackoffPolicy::default();
        let distinct: std::collections::HashSet<u128> =
            (0..40).map(|_| policy.delay(0).as_nanos()).collect();
        assert!(distinct.len() > 1, "jitter should produce varying delays");
    }
}
