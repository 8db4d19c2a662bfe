//! Inbound throughput in bytes per minute over a rolling window.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct ThroughputMeter {
    window_start: Instant,
    bytes: u64,
    last_rate: u64,
}

impl ThroughputMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            bytes: 0,
            last_rate: 0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_add(bytes as u64);
    }

    /// Close the current window and start a new one.
    ///
    /// Elapsed time is floored at one second so a short window does not
    /// report an inflated rate.
    pub fn roll(&mut self, now: Instant) -> u64 {
        let elapsed = now
            .saturating_duration_since(self.window_start)
            .max(Duration::from_secs(1));
        let minutes = elapsed.as_secs_f64() / 60.0;
        self.last_rate = (self.bytes as f64 / minutes).round() as u64;
        self.window_start = now;
        self.bytes = 0;
        self.last_rate
    }

    /// Rate computed at the last roll.
    pub fn bytes_per_min(&self) -> u64 {
        self.last_rate
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}
