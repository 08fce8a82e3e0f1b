//! Detection debouncer.
//!
//! A live camera produces many frames per second. The debouncer lets a
//! classification through only when the label changed or the same label has
//! been quiet for longer than the debounce window.

use std::time::Duration;
use tokio::time::Instant;

use crate::material::Label;

/// Minimum rounded confidence percent a classification needs.
pub const MIN_CONFIDENCE: u8 = 95;

/// Default window before an unchanged label is re-accepted.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Suppress,
}

/// Memory of the last accepted classification.
#[derive(Clone, Debug, Default)]
pub struct DetectionMemory {
    pub last_label: Option<Label>,
    pub last_accepted_at: Option<Instant>,
}

pub struct Debouncer {
    memory: DetectionMemory,
    window: Duration,
    min_confidence: u8,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW, MIN_CONFIDENCE)
    }
}

impl Debouncer {
    pub fn new(window: Duration, min_confidence: u8) -> Self {
        Self {
            memory: DetectionMemory::default(),
            window,
            min_confidence,
        }
    }

    /// Decide whether a classification is a significant change.
    ///
    /// Low-confidence results are suppressed even though adapters are
    /// expected to gate them already. Memory is only touched on accept.
    pub fn accept(&mut self, label: Label, confidence: u8, now: Instant) -> Decision {
        if confidence < self.min_confidence {
            return Decision::Suppress;
        }

        let changed = self.memory.last_label != Some(label);
        let window_elapsed = match self.memory.last_accepted_at {
            Some(at) => now.saturating_duration_since(at) > self.window,
            None => true,
        };

        if changed || window_elapsed {
            self.memory = DetectionMemory {
                last_label: Some(label),
                last_accepted_at: Some(now),
            };
            Decision::Accept
        } else {
            Decision::Suppress
        }
    }

    pub fn memory(&self) -> &DetectionMemory {
        &self.memory
    }
}
