//! Detection-and-claim orchestration core for a single-slot recycling kiosk.
//!
//! A camera classifier, a card reader and a container telemetry feed drive a
//! single claim slot. The slot, the debounce memory and the empty streak live
//! inside one actor task; the input loops talk to it through a
//! [`ClaimHandle`]. All external systems are injected as trait objects.

pub mod actor;
pub mod claim;
pub mod collaborators;
pub mod cue;
pub mod debounce;
pub mod empty;
pub mod error;
pub mod loops;
pub mod material;
pub mod metrics;
pub mod sink;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use actor::{ClaimHandle, spawn_claim_actor};
pub use claim::{ClaimId, ClaimMachine, ClaimSettings, ClaimState, GrantResolution, PendingClaim};
pub use collaborators::{
    Account, ArtifactRef, ArtifactStore, CardReader, Classifier, CuePlayer, Detection,
    GrantReceipt, GrantRequest, IdentityLookup, Ledger, TelemetrySource,
};
pub use error::{AdapterError, CoreError};
pub use material::{Label, Material};
pub use metrics::{KioskMetrics, MetricsSnapshot};
pub use sink::{ChannelSink, PresentationSink, Severity, SinkEvent};
pub use supervisor::{Collaborators, Kiosk, KioskSettings};
pub use telemetry::{ContainerId, FillState, TelemetryRecord};
