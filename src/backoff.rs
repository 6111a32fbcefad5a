//! Capped exponential backoff with optional jitter.

use crate::traits::Jitter;

const MAX_SHIFT: u32 = 20;

/// Shape of a backoff schedule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    /// Symmetric jitter as a percentage of the nominal delay
    pub jitter_percent: u8,
}

impl BackoffPolicy {
    /// Between failed connection attempts: 1s, 2s, 4s ... 30s, ±20%
    pub const CONNECT: Self = Self::new(1_000, 30_000, 20);

    /// Between upload retries: 2s, 4s, 8s ... 60s
    pub const UPLOAD: Self = Self::new(2_000, 60_000, 0);

    pub const fn new(base_ms: u64, cap_ms: u64, jitter_percent: u8) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter_percent,
        }
    }
}

/// Failure counter that turns into a delay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub const fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next attempt without jitter; zero until the first failure.
    pub fn nominal_ms(&self) -> u64 {
        self.delay_after(self.failures)
    }

    /// Count a failure and return the jittered delay before the next attempt.
    pub fn record_failure(&mut self, jitter: &mut impl Jitter) -> u64 {
        self.failures = self.failures.saturating_add(1);
        self.jittered(jitter)
    }

    /// Jump straight to the capped delay, used for failures that retrying
    /// quickly cannot fix.
    pub fn saturate(&mut self, jitter: &mut impl Jitter) -> u64 {
        let mut failures = self.failures.max(1);
        while failures <= MAX_SHIFT && self.delay_after(failures) < self.policy.cap_ms {
            failures += 1;
        }
        self.failures = failures;
        self.jittered(jitter)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    fn delay_after(&self, failures: u32) -> u64 {
        if failures == 0 {
            return 0;
        }
        // base, 2*base, 4*base, ... cap
        let shift = (failures - 1).min(MAX_SHIFT);
        self.policy
            .base_ms
            .saturating_mul(1u64 << shift)
            .min(self.policy.cap_ms)
    }

    fn jittered(&self, jitter: &mut impl Jitter) -> u64 {
        let nominal = self.nominal_ms();
        let span = nominal * u64::from(self.policy.jitter_percent) / 100;
        if span == 0 {
            return nominal;
        }
        let offset = u64::from(jitter.next_u32()) % (2 * span + 1);
        (nominal - span + offset).min(self.policy.cap_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedJitter, SeqJitter};

    #[test]
    fn grows_monotonically_up_to_cap() {
        let mut backoff = Backoff::new(BackoffPolicy::UPLOAD);
        let mut jitter = FixedJitter(0);
        let delays: [u64; 7] = core::array::from_fn(|_| backoff.record_failure(&mut jitter));

        assert_eq!(delays, [2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn resets_to_base_after_success() {
        let mut backoff = Backoff::new(BackoffPolicy::CONNECT);
        let mut jitter = FixedJitter(0);
        for _ in 0..4 {
            backoff.record_failure(&mut jitter);
        }
        assert_eq!(backoff.nominal_ms(), 8_000);

        backoff.reset();
        assert_eq!(backoff.nominal_ms(), 0);
        backoff.record_failure(&mut jitter);
        assert_eq!(backoff.nominal_ms(), 1_000);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let mut backoff = Backoff::new(BackoffPolicy::CONNECT);
        let mut jitter = SeqJitter::new(0x9E37_79B9);
        for _ in 0..12 {
            let delay = backoff.record_failure(&mut jitter);
            let nominal = backoff.nominal_ms();
            assert!(delay >= nominal - nominal / 5, "{delay} below {nominal}");
            assert!(delay <= nominal + nominal / 5, "{delay} above {nominal}");
            assert!(delay <= BackoffPolicy::CONNECT.cap_ms);
        }
    }

    #[test]
    fn nominal_delay_never_decreases_with_jitter_enabled() {
        let mut backoff = Backoff::new(BackoffPolicy::CONNECT);
        let mut jitter = SeqJitter::new(7);
        let mut previous = 0;
        for _ in 0..10 {
            backoff.record_failure(&mut jitter);
            assert!(backoff.nominal_ms() >= previous);
            previous = backoff.nominal_ms();
        }
        assert_eq!(previous, 30_000);
    }

    #[test]
    fn saturate_jumps_to_cap() {
        let mut backoff = Backoff::new(BackoffPolicy::UPLOAD);
        let delay = backoff.saturate(&mut FixedJitter(0));
        assert_eq!(delay, 60_000);
        assert_eq!(backoff.nominal_ms(), 60_000);
        // further failures stay at the cap
        assert_eq!(backoff.record_failure(&mut FixedJitter(0)), 60_000);
    }
}
