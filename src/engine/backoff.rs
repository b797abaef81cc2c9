//! Retry delays shared by meeting transitions and subscription renewal.
//!
//! `delay(n) = min(base * 2^n, max) + jitter(0..=window)`.

use std::time::Duration;

use rand::Rng;

/// Extra delay added on top of the exponential part.
pub trait Jitter: Send + Sync {
    /// A value in `0..=window`.
    fn jitter(&self, window: Duration) -> Duration;
}

/// Uniform random jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn jitter(&self, window: Duration) -> Duration {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=window_ms))
    }
}

/// Always the same fraction of the window, in per-mille. Deterministic.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter {
    per_mille: u32,
}

impl FixedJitter {
    pub fn new(per_mille: u32) -> Self {
        Self {
            per_mille: per_mille.min(1000),
        }
    }

    pub fn none() -> Self {
        Self::new(0)
    }
}

impl Jitter for FixedJitter {
    fn jitter(&self, window: Duration) -> Duration {
        window.mul_f64(f64::from(self.per_mille) / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_window: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_window: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_window,
        }
    }

    /// The capped exponential part, before jitter.
    pub fn capped(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    pub fn delay(&self, attempt: u32, jitter: &dyn Jitter) -> Duration {
        let extra = jitter.jitter(self.jitter_window).min(self.jitter_window);
        self.capped(attempt).saturating_add(extra)
    }

    /// The same delay as a chrono duration, for timestamp arithmetic.
    pub fn delay_chrono(&self, attempt: u32, jitter: &dyn Jitter) -> chrono::Duration {
        chrono::Duration::from_std(self.delay(attempt, jitter))
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)))
    }
}
