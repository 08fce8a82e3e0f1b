//! Kiosk metrics for observability
//!
//! Counters are updated from every loop without taking the claim lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::telemetry::ContainerId;

/// Process-wide counters
#[derive(Debug, Default)]
pub struct KioskMetrics {
    // Detection
    /// Classifications that passed the debouncer
    pub detections_accepted: AtomicU64,
    /// Classifications suppressed as insignificant
    pub detections_suppressed: AtomicU64,
    /// Classifier calls that failed
    pub classifier_errors: AtomicU64,

    // Claims
    pub claims_opened: AtomicU64,
    pub claims_granted: AtomicU64,
    pub claims_timed_out: AtomicU64,
    /// Claims closed by the empty monitor
    pub claims_cleared: AtomicU64,
    /// Swipes with a card nobody owns
    pub invalid_cards: AtomicU64,
    /// Identity or ledger failures while granting
    pub grant_failures: AtomicU64,

    // Telemetry
    pub telemetry_written: AtomicU64,
    pub telemetry_suppressed: AtomicU64,
    /// Records dropped by payload validation
    pub telemetry_dropped: AtomicU64,
    pub telemetry_errors: AtomicU64,
    pub plastic_full_count: AtomicU64,
    pub aluminum_full_count: AtomicU64,

    // Presentation
    /// Sink events dropped due to backpressure
    pub sink_events_dropped: AtomicU64,

    /// Start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl KioskMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn detection_accepted(&self) {
        self.detections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn detection_suppressed(&self) {
        self.detections_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn classifier_error(&self) {
        self.classifier_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claim_opened(&self) {
        self.claims_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claim_granted(&self) {
        self.claims_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claim_timed_out(&self) {
        self.claims_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claim_cleared(&self) {
        self.claims_cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_card(&self) {
        self.invalid_cards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn grant_failure(&self) {
        self.grant_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_written(&self) {
        self.telemetry_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_suppressed(&self) {
        self.telemetry_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_dropped(&self) {
        self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_error(&self) {
        self.telemetry_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn container_full(&self, container: ContainerId) {
        match container {
            ContainerId::Plastic => self.plastic_full_count.fetch_add(1, Ordering::Relaxed),
            ContainerId::Aluminum => self.aluminum_full_count.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn sink_event_dropped(&self) {
        self.sink_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            detection: DetectionMetrics {
                accepted: self.detections_accepted.load(Ordering::Relaxed),
                suppressed: self.detections_suppressed.load(Ordering::Relaxed),
                errors: self.classifier_errors.load(Ordering::Relaxed),
            },
            claims: ClaimMetrics {
                opened: self.claims_opened.load(Ordering::Relaxed),
                granted: self.claims_granted.load(Ordering::Relaxed),
                timed_out: self.claims_timed_out.load(Ordering::Relaxed),
                cleared: self.claims_cleared.load(Ordering::Relaxed),
                invalid_cards: self.invalid_cards.load(Ordering::Relaxed),
                grant_failures: self.grant_failures.load(Ordering::Relaxed),
            },
            telemetry: TelemetryMetrics {
                written: self.telemetry_written.load(Ordering::Relaxed),
                suppressed: self.telemetry_suppressed.load(Ordering::Relaxed),
                dropped: self.telemetry_dropped.load(Ordering::Relaxed),
                errors: self.telemetry_errors.load(Ordering::Relaxed),
                plastic_full: self.plastic_full_count.load(Ordering::Relaxed),
                aluminum_full: self.aluminum_full_count.load(Ordering::Relaxed),
            },
            sink: SinkMetrics {
                dropped: self.sink_events_dropped.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub detection: DetectionMetrics,
    pub claims: ClaimMetrics,
    pub telemetry: TelemetryMetrics,
    pub sink: SinkMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub accepted: u64,
    pub suppressed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimMetrics {
    pub opened: u64,
    pub granted: u64,
    pub timed_out: u64,
    pub cleared: u64,
    pub invalid_cards: u64,
    pub grant_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    pub written: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub errors: u64,
    pub plastic_full: u64,
    pub aluminum_full: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkMetrics {
    pub dropped: u64,
}
