//! Claim state machine
//!
//! Owns the single pending-claim slot together with the debounce memory, the
//! empty streak and the cue throttle. Every operation takes the current
//! monotonic time and returns a [`Step`]: the transitions that happened and
//! the side effects the caller must carry out (sink notifications, artifact
//! releases, audio cues). The machine itself performs no I/O.
//!
//! ```text
//! Idle --eligible detection--> PendingClaim --card--> Granting --granted--> Idle
//!                                  |   ^                  |
//!                                  |   +--lookup/ledger---+
//!                                  |       failure
//!                                  +--timeout / prolonged empty--> Idle
//! ```

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::collaborators::{Account, ArtifactRef, Detection, GrantReceipt};
use crate::cue::{CueThrottle, DEFAULT_CUE_COOLDOWN};
use crate::debounce::{DEFAULT_DEBOUNCE_WINDOW, Debouncer, Decision, MIN_CONFIDENCE};
use crate::empty::{DEFAULT_EMPTY_TIMEOUT, EmptyMonitor};
use crate::material::{Label, Material};
use crate::sink::{Severity, SinkEvent};

pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier of one claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ClaimId(Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Timing knobs for the machine.
#[derive(Clone, Debug)]
pub struct ClaimSettings {
    pub claim_timeout: Duration,
    pub debounce_window: Duration,
    pub min_confidence: u8,
    pub empty_timeout: Duration,
    pub cue_cooldown: Duration,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            min_confidence: MIN_CONFIDENCE,
            empty_timeout: DEFAULT_EMPTY_TIMEOUT,
            cue_cooldown: DEFAULT_CUE_COOLDOWN,
        }
    }
}

/// A reserved, not-yet-redeemed right to points.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingClaim {
    pub id: ClaimId,
    pub material: Material,
    pub points: u32,
    pub created_at: Instant,
    pub artifact: Option<ArtifactRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClaimState {
    Idle,
    PendingClaim,
    /// A card was accepted and its grant is in flight
    Granting,
}

/// The claim lives inside the state that owns it, so a claim without a
/// pending state (or the reverse) cannot be represented.
#[derive(Debug)]
enum Slot {
    Idle,
    Pending(PendingClaim),
    Granting(PendingClaim),
}

/// What the card-holder redemption came back with.
#[derive(Clone, Debug, PartialEq)]
pub enum GrantResolution {
    Granted {
        account: Account,
        receipt: GrantReceipt,
    },
    /// The card is not registered to anyone
    UnknownCard,
    /// Identity lookup could not complete (timeout, network)
    LookupFailed(String),
    /// The ledger write failed
    LedgerFailed(String),
}

/// Handed to the card loop when a swipe starts a grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantTicket {
    pub claim_id: ClaimId,
    pub material: Material,
    pub points: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// Classification dropped by the debouncer
    Suppressed,
    Accepted(Label),
    Opened {
        claim_id: ClaimId,
        material: Material,
        points: u32,
    },
    /// Eligible detection while a claim is already outstanding
    Ignored(Material),
    GrantStarted(ClaimId),
    Granted {
        claim_id: ClaimId,
        points: u32,
        new_total: u64,
    },
    InvalidCard(ClaimId),
    GrantFailed(ClaimId),
    TimedOut(ClaimId),
    /// Closed by the empty monitor
    ForceCleared(ClaimId),
    NothingToClaim,
    /// Card presented while another grant is in flight
    GrantBusy,
    /// Resolution for a claim that is no longer being granted
    StaleResolution(ClaimId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Notify(SinkEvent),
    Release(ArtifactRef),
    Cue(Material),
}

/// Result of one machine operation.
#[derive(Debug, Default)]
pub struct Step {
    pub transitions: Vec<Transition>,
    pub effects: Vec<Effect>,
}

impl Step {
    fn status(&mut self, message: String, severity: Severity) {
        self.effects
            .push(Effect::Notify(SinkEvent::Status { message, severity }));
    }

    fn pending(&mut self, claim: Option<(Material, u32)>) {
        self.effects.push(Effect::Notify(SinkEvent::PendingClaim {
            material: claim.map(|(m, _)| m),
            points: claim.map(|(_, p)| p),
        }));
    }

    fn release(&mut self, artifact: Option<ArtifactRef>) {
        if let Some(artifact) = artifact {
            self.effects.push(Effect::Release(artifact));
        }
    }

    pub fn notifications(&self) -> impl Iterator<Item = &SinkEvent> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Notify(event) => Some(event),
            _ => None,
        })
    }

    pub fn released(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Release(artifact) => Some(artifact),
            _ => None,
        })
    }
}

/// Read-only view of the slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ClaimSnapshot {
    pub state: ClaimState,
    pub claim: Option<PendingClaim>,
}

pub struct ClaimMachine {
    slot: Slot,
    debouncer: Debouncer,
    empty: EmptyMonitor,
    cue: CueThrottle,
    claim_timeout: Duration,
}

impl Default for ClaimMachine {
    fn default() -> Self {
        Self::new(ClaimSettings::default())
    }
}

impl ClaimMachine {
    pub fn new(settings: ClaimSettings) -> Self {
        Self {
            slot: Slot::Idle,
            debouncer: Debouncer::new(settings.debounce_window, settings.min_confidence),
            empty: EmptyMonitor::new(settings.empty_timeout),
            cue: CueThrottle::new(settings.cue_cooldown),
            claim_timeout: settings.claim_timeout,
        }
    }

    pub fn state(&self) -> ClaimState {
        match self.slot {
            Slot::Idle => ClaimState::Idle,
            Slot::Pending(_) => ClaimState::PendingClaim,
            Slot::Granting(_) => ClaimState::Granting,
        }
    }

    pub fn claim(&self) -> Option<&PendingClaim> {
        match &self.slot {
            Slot::Idle => None,
            Slot::Pending(claim) | Slot::Granting(claim) => Some(claim),
        }
    }

    pub fn snapshot(&self) -> ClaimSnapshot {
        ClaimSnapshot {
            state: self.state(),
            claim: self.claim().cloned(),
        }
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// Feed one classification from the detection loop.
    ///
    /// The detection's artifact is either adopted by a new claim or released.
    pub fn on_classification(&mut self, detection: Detection, now: Instant) -> Step {
        let mut step = Step::default();
        let Detection {
            label,
            confidence,
            artifact,
        } = detection;

        if self.debouncer.accept(label, confidence, now) == Decision::Suppress {
            step.transitions.push(Transition::Suppressed);
            step.release(artifact);
            return step;
        }
        step.transitions.push(Transition::Accepted(label));

        let streak_fired = self.empty.observe(label, now);
        if streak_fired {
            self.force_clear(&mut step);
        }

        match label {
            Label::Empty => {
                step.release(artifact);
                if !streak_fired && matches!(self.slot, Slot::Idle) {
                    step.status("Detected: empty".to_string(), Severity::Info);
                }
            }
            Label::Material(material) => match self.slot {
                Slot::Idle => self.open(material, artifact, now, &mut step),
                Slot::Pending(_) | Slot::Granting(_) => {
                    step.transitions.push(Transition::Ignored(material));
                    step.release(artifact);
                }
            },
        }

        step
    }

    fn open(
        &mut self,
        material: Material,
        artifact: Option<ArtifactRef>,
        now: Instant,
        step: &mut Step,
    ) {
        let claim = PendingClaim {
            id: ClaimId::new(),
            material,
            points: material.points(),
            created_at: now,
            artifact,
        };

        step.transitions.push(Transition::Opened {
            claim_id: claim.id,
            material,
            points: claim.points,
        });
        step.status(
            format!(
                "{} detected! Present your card to receive {} points (time limit: {}s)",
                material.as_str().to_uppercase(),
                claim.points,
                self.claim_timeout.as_secs()
            ),
            Severity::Success,
        );
        step.pending(Some((material, claim.points)));
        if self.cue.should_cue(material, now) {
            step.effects.push(Effect::Cue(material));
        }

        self.slot = Slot::Pending(claim);
    }

    /// Close the outstanding claim because the bin has been empty too long.
    fn force_clear(&mut self, step: &mut Step) {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Pending(claim) => {
                step.transitions.push(Transition::ForceCleared(claim.id));
                step.status(
                    format!(
                        "Bin area empty for too long, {} claim closed",
                        claim.material
                    ),
                    Severity::Warning,
                );
                step.pending(None);
                step.release(claim.artifact);
            }
            // A grant in flight finishes or fails on its own; a failure puts
            // the claim back under the regular timeout.
            granting @ Slot::Granting(_) => self.slot = granting,
            Slot::Idle => {}
        }
    }

    /// Advance wall-clock driven transitions.
    pub fn on_tick(&mut self, now: Instant) -> Step {
        let mut step = Step::default();
        let expired = match &self.slot {
            Slot::Pending(claim) => {
                now.saturating_duration_since(claim.created_at) > self.claim_timeout
            }
            _ => false,
        };
        if !expired {
            return step;
        }

        if let Slot::Pending(claim) = std::mem::replace(&mut self.slot, Slot::Idle) {
            step.transitions.push(Transition::TimedOut(claim.id));
            step.status(
                format!(
                    "Time ran out to claim {}, resetting",
                    claim.material.as_str().to_uppercase()
                ),
                Severity::Warning,
            );
            step.pending(None);
            step.release(claim.artifact);
        }
        step
    }

    /// A card was presented. Returns a ticket when the swipe starts a grant.
    pub fn on_card(&mut self) -> (Step, Option<GrantTicket>) {
        let mut step = Step::default();
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Idle => {
                step.transitions.push(Transition::NothingToClaim);
                step.status(
                    "No material detected. Place a material first.".to_string(),
                    Severity::Warning,
                );
                (step, None)
            }
            Slot::Pending(claim) => {
                let ticket = GrantTicket {
                    claim_id: claim.id,
                    material: claim.material,
                    points: claim.points,
                };
                step.transitions.push(Transition::GrantStarted(claim.id));
                self.slot = Slot::Granting(claim);
                (step, Some(ticket))
            }
            Slot::Granting(claim) => {
                self.slot = Slot::Granting(claim);
                step.transitions.push(Transition::GrantBusy);
                step.status(
                    "Please wait, the previous card is still being processed".to_string(),
                    Severity::Info,
                );
                (step, None)
            }
        }
    }

    /// Finish a grant started by [`ClaimMachine::on_card`].
    ///
    /// Only a successful grant consumes the claim. Every failure puts the
    /// claim back exactly as it was, creation time included, so the timeout
    /// keeps running and a later swipe can retry.
    pub fn on_grant_resolved(
        &mut self,
        claim_id: ClaimId,
        resolution: GrantResolution,
        now: Instant,
    ) -> Step {
        let mut step = Step::default();
        let claim = match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Granting(claim) if claim.id == claim_id => claim,
            other => {
                self.slot = other;
                step.transitions.push(Transition::StaleResolution(claim_id));
                return step;
            }
        };

        match resolution {
            GrantResolution::Granted { account, receipt } => {
                step.transitions.push(Transition::Granted {
                    claim_id,
                    points: receipt.points_granted,
                    new_total: receipt.new_total,
                });
                step.effects.push(Effect::Notify(SinkEvent::ClaimGranted {
                    name: account.display_name.clone(),
                    new_total: receipt.new_total,
                }));
                step.status(
                    format!(
                        "{} received {} points! Total: {}",
                        account.display_name, receipt.points_granted, receipt.new_total
                    ),
                    Severity::Success,
                );
                step.pending(None);
                step.release(claim.artifact);
            }
            GrantResolution::UnknownCard => {
                step.transitions.push(Transition::InvalidCard(claim_id));
                step.status(
                    format!(
                        "Invalid user. {} claim ({} points) still open, {}s left",
                        claim.material.as_str().to_uppercase(),
                        claim.points,
                        self.remaining_secs(&claim, now)
                    ),
                    Severity::Error,
                );
                self.slot = Slot::Pending(claim);
            }
            GrantResolution::LookupFailed(reason) => {
                step.transitions.push(Transition::GrantFailed(claim_id));
                step.status(
                    format!(
                        "Could not verify card ({}). Swipe again, {}s left",
                        reason,
                        self.remaining_secs(&claim, now)
                    ),
                    Severity::Warning,
                );
                self.slot = Slot::Pending(claim);
            }
            GrantResolution::LedgerFailed(reason) => {
                step.transitions.push(Transition::GrantFailed(claim_id));
                step.status(
                    format!(
                        "Error granting points ({}). Swipe again to retry, {}s left",
                        reason,
                        self.remaining_secs(&claim, now)
                    ),
                    Severity::Error,
                );
                self.slot = Slot::Pending(claim);
            }
        }
        step
    }

    /// Release whatever the slot still owns. Used at shutdown.
    pub fn shutdown(&mut self) -> Step {
        let mut step = Step::default();
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Pending(claim) | Slot::Granting(claim) => {
                step.pending(None);
                step.release(claim.artifact);
            }
            Slot::Idle => {}
        }
        self.empty.reset();
        step
    }

    fn remaining_secs(&self, claim: &PendingClaim, now: Instant) -> u64 {
        let remaining = self
            .claim_timeout
            .saturating_sub(now.saturating_duration_since(claim.created_at));
        remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
    }
}
