//! Presentation sink: one-way notifications to whatever renders kiosk state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::material::Material;
use crate::metrics::KioskMetrics;
use crate::telemetry::{ContainerId, FillState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Receives kiosk state changes. Implementations must never block the caller.
pub trait PresentationSink: Send + Sync {
    fn on_status(&self, message: &str, severity: Severity);

    /// `None` clears the pending-claim display.
    fn on_pending_claim(&self, claim: Option<(Material, u32)>);

    fn on_claim_granted(&self, name: &str, new_total: u64);

    fn on_container(&self, container: ContainerId, percent: u8, state: FillState);
}

/// A sink notification as a value, for queueing and serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEvent {
    Status {
        message: String,
        severity: Severity,
    },
    PendingClaim {
        material: Option<Material>,
        points: Option<u32>,
    },
    ClaimGranted {
        name: String,
        new_total: u64,
    },
    Container {
        container: ContainerId,
        percent: u8,
        state: FillState,
    },
}

impl SinkEvent {
    /// Hand this event to a sink through the matching callback.
    pub fn deliver(&self, sink: &dyn PresentationSink) {
        match self {
            SinkEvent::Status { message, severity } => sink.on_status(message, *severity),
            SinkEvent::PendingClaim { material, points } => {
                sink.on_pending_claim(material.zip(*points))
            }
            SinkEvent::ClaimGranted { name, new_total } => sink.on_claim_granted(name, *new_total),
            SinkEvent::Container {
                container,
                percent,
                state,
            } => sink.on_container(*container, *percent, *state),
        }
    }
}

/// Sink that queues events on a bounded channel. When the consumer falls
/// behind, events are dropped and counted instead of blocking.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
    metrics: Arc<KioskMetrics>,
}

impl ChannelSink {
    pub fn new(capacity: usize, metrics: Arc<KioskMetrics>) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, metrics }, rx)
    }

    fn push(&self, event: SinkEvent) {
        if self.tx.try_send(event).is_err() {
            self.metrics.sink_event_dropped();
        }
    }
}

impl PresentationSink for ChannelSink {
    fn on_status(&self, message: &str, severity: Severity) {
        self.push(SinkEvent::Status {
            message: message.to_string(),
            severity,
        });
    }

    fn on_pending_claim(&self, claim: Option<(Material, u32)>) {
        self.push(SinkEvent::PendingClaim {
            material: claim.map(|(m, _)| m),
            points: claim.map(|(_, p)| p),
        });
    }

    fn on_claim_granted(&self, name: &str, new_total: u64) {
        self.push(SinkEvent::ClaimGranted {
            name: name.to_string(),
            new_total,
        });
    }

    fn on_container(&self, container: ContainerId, percent: u8, state: FillState) {
        self.push(SinkEvent::Container {
            container,
            percent,
            state,
        });
    }
}
