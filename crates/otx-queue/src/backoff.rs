//! Exponential retry backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Retry schedule knobs: exponential from `base_secs`, capped at
/// `cap_secs`, jittered ±20%.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base_secs: u64,
    pub cap_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 2,
            cap_secs: 300,
        }
    }
}

/// Delay before retry number `attempt` (1-based: the first retry of a job
/// passes `attempt = 1` and lands near `base_secs`).
pub fn backoff_delay(attempt: i32, policy: RetryPolicy, rng: &mut impl Rng) -> Duration {
    let attempt = attempt.max(1) as u32;
    let exp = attempt.saturating_sub(1).min(20);
    let raw = policy
        .base_secs
        .saturating_mul(1u64 << exp)
        .min(policy.cap_secs);
    // ±20% jitter so synchronized failures do not retry in lockstep.
    let jitter = rng.gen_range(0.8_f64..=1.2_f64);
    let millis = (raw as f64 * 1000.0 * jitter).round() as u64;
    Duration::from_millis(millis.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn first_retry_is_about_two_seconds() {
        let mut r = rng();
        for _ in 0..32 {
            let d = backoff_delay(1, RetryPolicy::default(), &mut r);
            assert!(d >= Duration::from_millis(1600), "{d:?}");
            assert!(d <= Duration::from_millis(2400), "{d:?}");
        }
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut r = rng();
        let policy = RetryPolicy::default();
        // Compare midpoints, not single jittered samples.
        let mut mid = |attempt: i32| {
            let samples: Vec<u128> = (0..64)
                .map(|_| backoff_delay(attempt, policy, &mut r).as_millis())
                .collect();
            samples.iter().sum::<u128>() / samples.len() as u128
        };
        let m1 = mid(1);
        let m2 = mid(2);
        let m3 = mid(3);
        assert!(m2 > m1);
        assert!(m3 > m2);
    }

    #[test]
    fn delay_caps_at_five_minutes() {
        let mut r = rng();
        for attempt in [10, 15, 20, 100] {
            let d = backoff_delay(attempt, RetryPolicy::default(), &mut r);
            // Cap 300 s plus the +20% jitter ceiling.
            assert!(d <= Duration::from_millis(360_000), "{d:?}");
            assert!(d >= Duration::from_millis(240_000), "{d:?}");
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let mut r = rng();
        let d = backoff_delay(i32::MAX, RetryPolicy::default(), &mut r);
        assert!(d <= Duration::from_millis(360_000));
    }
}
