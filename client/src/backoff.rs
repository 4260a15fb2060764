//! Reconnect scheduling: capped exponential backoff.
//!
//! DESIGN
//! ======
//! The delay for attempt count `k` is `min(base^k, cap)` seconds. The counter
//! advances on every scheduling decision, including ones that only arm a
//! timer, and returns to zero once a connection opens. Elapsed time is
//! measured from the last connection attempt, so a connection that stayed up
//! longer than the delay reconnects immediately.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ClientConfig;

/// What the manager should do after losing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Enough time has passed since the last attempt; connect right away.
    Now,
    /// Arm a one-shot timer for the remaining wait.
    After(Duration),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    base: u32,
    cap: Duration,
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self { base: config.reconnect_base, cap: config.reconnect_cap, attempts: 0, last_attempt: None }
    }

    /// Number of scheduling decisions since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay for attempt count `attempts`.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        u64::from(self.base)
            .checked_pow(attempts)
            .map_or(self.cap, |secs| Duration::from_secs(secs).min(self.cap))
    }

    /// Remember when a connection attempt started.
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Connection opened: start over from the shortest delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Decide when to reconnect and advance the attempt counter.
    pub fn schedule(&mut self) -> Schedule {
        self.schedule_at(Instant::now())
    }

    /// Internal: scheduling decision with explicit timestamp (for testing).
    fn schedule_at(&mut self, now: Instant) -> Schedule {
        let delay = self.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        let elapsed = self
            .last_attempt
            .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
        if elapsed >= delay { Schedule::Now } else { Schedule::After(delay - elapsed) }
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
