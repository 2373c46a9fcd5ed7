//! Countdown timer driven by caller-supplied instants
//!
//! Every timed behaviour in the arbiter (hang times, the mode timeout, CW
//! identification, the DMR TX guard) is a `Timer`. The current time is always
//! passed in, so the arbiter and its tests decide what "now" means.

use std::time::{Duration, Instant};

/// A restartable countdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    duration: Duration,
    started: Option<Instant>,
}

impl Timer {
    /// Create a stopped timer with the given duration
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: None,
        }
    }

    /// Set the duration and start counting from `now`
    pub fn start(&mut self, duration: Duration, now: Instant) {
        self.duration = duration;
        self.started = Some(now);
    }

    /// Stop the timer; a stopped timer never expires
    pub fn stop(&mut self) {
        self.started = None;
    }

    /// Restart from `now` keeping the current duration
    pub fn reset(&mut self, now: Instant) {
        self.started = Some(now);
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Time since the last start or reset, zero when stopped
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    /// Time left before expiry, zero when stopped or expired
    pub fn remaining(&self, now: Instant) -> Duration {
        if self.started.is_none() {
            return Duration::ZERO;
        }
        self.duration.saturating_sub(self.elapsed(now))
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        self.started.is_some() && self.elapsed(now) >= self.duration
    }
}
