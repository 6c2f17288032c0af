// ── Per-device retry delay ──

use std::time::Duration;

/// Exponential backoff: `base`, `2*base`, `4*base`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay before the next attempt after another failure.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from `base` after a success.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay the next failure would return.
    pub fn peek(&self) -> Duration {
        self.current
    }
}
