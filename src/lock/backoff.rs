//! Retry schedule for contended locks

use std::time::{Duration, Instant};

/// Exponentially growing delays, bounded by an overall timeout
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    timeout: Duration,
    slot: Duration,
    max_delay: Duration,
    attempt: u32,
    started: Instant,
}

impl ExponentialBackoff {
    /// Start a schedule; the timeout clock starts now
    pub fn new(timeout: Duration, slot: Duration, max_delay: Duration) -> Self {
        Self {
            timeout,
            slot,
            max_delay,
            attempt: 0,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Delay before the next attempt, or `None` once the timeout is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.timeout.checked_sub(self.elapsed())?;
        if remaining.is_zero() {
            return None;
        }

        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self
            .slot
            .saturating_mul(factor)
            .min(self.max_delay)
            .min(remaining);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}
