//! Empty-streak monitor.
//!
//! Watches accepted classifications for an unbroken run of "empty" and fires
//! once the run has lasted long enough. Firing clears the streak, so a new
//! run has to build up before it can fire again.

use std::time::Duration;
use tokio::time::Instant;

use crate::material::Label;

pub const DEFAULT_EMPTY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EmptyMonitor {
    streak_started: Option<Instant>,
    timeout: Duration,
}

impl Default for EmptyMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_EMPTY_TIMEOUT)
    }
}

impl EmptyMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            streak_started: None,
            timeout,
        }
    }

    /// Observe one accepted classification. Returns true when the streak fires.
    pub fn observe(&mut self, label: Label, now: Instant) -> bool {
        if !label.is_empty() {
            self.streak_started = None;
            return false;
        }

        match self.streak_started {
            None => {
                self.streak_started = Some(now);
                false
            }
            Some(started) if now.saturating_duration_since(started) >= self.timeout => {
                self.streak_started = None;
                true
            }
            Some(_) => false,
        }
    }

    pub fn streak_started(&self) -> Option<Instant> {
        self.streak_started
    }

    pub fn reset(&mut self) {
        self.streak_started = None;
    }
}
