//! Minimum-interval gate for intermediate drawing updates.

use std::time::{Duration, Instant};

/// Roughly one frame at 60 Hz.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(16);

/// Lets an event through at most once per interval.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_INTERVAL)
    }
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true (and arms the gate) if `now` is at least one interval
    /// after the last event that passed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forget the last event so the next one passes.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
