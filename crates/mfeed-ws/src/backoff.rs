//! Reconnect backoff.
//!
//! Delay for attempt `n` (0-based) is `min(max, base * 2^n)`, plus a jitter
//! drawn from `[0, min(250ms, delay))`. The total wait is never below `base`.

use rand::Rng;
use std::time::Duration;

/// Upper bound on jitter added to any reconnect delay.
pub const MAX_JITTER_MS: u64 = 250;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    /// General reconnect scheduler defaults.
    pub const RECONNECT: Self = Self::new(500, 30_000);

    /// Reconnects after a missed pong use a slower curve.
    pub const HEARTBEAT: Self = Self::new(1_000, 60_000);

    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Pre-jitter delay in milliseconds for a 0-based attempt.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Exclusive upper bound of the jitter for a given pre-jitter delay.
    pub fn jitter_cap_ms(delay_ms: u64) -> u64 {
        delay_ms.min(MAX_JITTER_MS)
    }

    /// Full wait for an attempt, jitter included.
    pub fn delay_with_jitter<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay_ms(attempt);
        let cap = Self::jitter_cap_ms(delay);
        let jitter = if cap == 0 { 0 } else { rng.gen_range(0..cap) };
        Duration::from_millis(delay.saturating_add(jitter).max(self.base_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::RECONNECT
    }
}
