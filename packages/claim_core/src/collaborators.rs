//! Contracts for the external collaborators the core is driven by.
//!
//! Every collaborator is injected as a trait object so the core can run
//! against real devices in the kiosk binary and against fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::claim::ClaimId;
use crate::error::AdapterError;
use crate::material::{Label, Material};
use crate::telemetry::TelemetryRecord;

/// Opaque handle to a captured evidence image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classification result from the camera.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: Label,
    /// Rounded confidence percent, 0..=100
    pub confidence: u8,
    /// Evidence image, owned by whoever holds the detection until released
    pub artifact: Option<ArtifactRef>,
}

/// Captures an image and classifies it.
///
/// `Ok(None)` means nothing usable came out of this frame (no material,
/// confidence under the threshold, out-of-vocabulary class). Adapters release
/// any artifact they captured for frames they don't return.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn detect(&self) -> Result<Option<Detection>, AdapterError>;
}

/// Blocks until the next card is presented. `Ok(None)` means the reader is
/// gone for good.
#[async_trait]
pub trait CardReader: Send {
    async fn next_card(&mut self) -> Result<Option<String>, AdapterError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub account_id: String,
    pub display_name: String,
}

#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` means the card is not registered to anyone.
    async fn lookup(&self, card_id: &str) -> Result<Option<Account>, AdapterError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantRequest {
    /// Unique per claim, usable as an idempotency key for the history entry
    pub claim_id: ClaimId,
    pub account_id: String,
    pub material: Material,
    pub points: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrantReceipt {
    pub points_granted: u32,
    pub new_total: u64,
}

/// Remote store of user points and container telemetry.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Add the claim's points to the account and append a history entry.
    async fn grant_points(&self, request: &GrantRequest) -> Result<GrantReceipt, AdapterError>;

    async fn update_telemetry(&self, record: &TelemetryRecord) -> Result<(), AdapterError>;
}

/// Stream of validated telemetry records. `Ok(None)` means the feed closed.
#[async_trait]
pub trait TelemetrySource: Send {
    async fn next_record(&mut self) -> Result<Option<TelemetryRecord>, AdapterError>;
}

/// Owner of captured evidence images.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Dispose of an artifact. Releasing an artifact that is already gone is
    /// not an error.
    async fn release(&self, artifact: ArtifactRef) -> Result<(), AdapterError>;
}

/// Plays the per-material audio cue. Must not block.
pub trait CuePlayer: Send + Sync {
    fn play(&self, material: Material);
}
