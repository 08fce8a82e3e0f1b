//! Claim actor: the single exclusion domain around [`ClaimMachine`].
//!
//! The detection and card loops never touch the machine directly. They send
//! commands to this task, which applies them one at a time and interleaves a
//! periodic tick for the claim timeout. Network calls never run in here.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claim::{
    ClaimId, ClaimMachine, ClaimSettings, ClaimSnapshot, ClaimState, Effect, GrantResolution,
    GrantTicket, Step, Transition,
};
use crate::collaborators::{ArtifactStore, CuePlayer, Detection};
use crate::error::CoreError;
use crate::metrics::KioskMetrics;
use crate::sink::PresentationSink;

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Commands that can be sent to the claim actor
#[derive(Debug)]
pub enum ClaimCommand {
    Classified {
        detection: Detection,
        respond_to: oneshot::Sender<ClaimState>,
    },
    CardPresented {
        respond_to: oneshot::Sender<Option<GrantTicket>>,
    },
    GrantResolved {
        claim_id: ClaimId,
        resolution: GrantResolution,
        respond_to: oneshot::Sender<()>,
    },
    Snapshot {
        respond_to: oneshot::Sender<ClaimSnapshot>,
    },
}

/// Handle to communicate with the claim actor
#[derive(Clone)]
pub struct ClaimHandle {
    sender: mpsc::Sender<ClaimCommand>,
}

impl ClaimHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ClaimCommand,
    ) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| CoreError::ActorGone)?;
        rx.await.map_err(|_| CoreError::NoResponse)
    }

    /// Feed a classification. Returns the claim state after it was applied.
    pub async fn classified(&self, detection: Detection) -> Result<ClaimState, CoreError> {
        self.request(|respond_to| ClaimCommand::Classified {
            detection,
            respond_to,
        })
        .await
    }

    /// Report a card swipe. A ticket means the caller must redeem it and
    /// answer with [`ClaimHandle::grant_resolved`].
    pub async fn card_presented(&self) -> Result<Option<GrantTicket>, CoreError> {
        self.request(|respond_to| ClaimCommand::CardPresented { respond_to })
            .await
    }

    pub async fn grant_resolved(
        &self,
        claim_id: ClaimId,
        resolution: GrantResolution,
    ) -> Result<(), CoreError> {
        self.request(|respond_to| ClaimCommand::GrantResolved {
            claim_id,
            resolution,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<ClaimSnapshot, CoreError> {
        self.request(|respond_to| ClaimCommand::Snapshot { respond_to })
            .await
    }
}

/// Side-effect targets for the actor.
#[derive(Clone)]
pub struct ClaimOutputs {
    pub sink: Arc<dyn PresentationSink>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub cue: Arc<dyn CuePlayer>,
    pub metrics: Arc<KioskMetrics>,
}

struct ClaimActor {
    machine: ClaimMachine,
    receiver: mpsc::Receiver<ClaimCommand>,
    outputs: ClaimOutputs,
    tick: Duration,
    stop: CancellationToken,
}

/// Spawn the claim actor. It runs until `stop` fires or every
/// [`ClaimHandle`] is dropped, then releases whatever the slot still holds.
pub fn spawn_claim_actor(
    settings: ClaimSettings,
    tick: Duration,
    outputs: ClaimOutputs,
    stop: CancellationToken,
) -> (ClaimHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(32);
    let actor = ClaimActor {
        machine: ClaimMachine::new(settings),
        receiver,
        outputs,
        tick,
        stop,
    };
    let task = tokio::spawn(actor.run());
    (ClaimHandle { sender }, task)
}

impl ClaimActor {
    async fn run(mut self) {
        debug!(
            "Claim actor started (timeout {:?}, tick {:?})",
            self.machine.claim_timeout(),
            self.tick
        );
        let mut tick_interval = tokio::time::interval(self.tick);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = tick_interval.tick() => {
                    let step = self.machine.on_tick(Instant::now());
                    self.apply(step).await;
                }
            }
        }

        let step = self.machine.shutdown();
        self.apply(step).await;
        debug!("Claim actor stopped");
    }

    async fn handle(&mut self, cmd: ClaimCommand) {
        match cmd {
            ClaimCommand::Classified {
                detection,
                respond_to,
            } => {
                let step = self.machine.on_classification(detection, Instant::now());
                self.apply(step).await;
                let _ = respond_to.send(self.machine.state());
            }

            ClaimCommand::CardPresented { respond_to } => {
                let (step, ticket) = self.machine.on_card();
                self.apply(step).await;
                let _ = respond_to.send(ticket);
            }

            ClaimCommand::GrantResolved {
                claim_id,
                resolution,
                respond_to,
            } => {
                let step = self
                    .machine
                    .on_grant_resolved(claim_id, resolution, Instant::now());
                self.apply(step).await;
                let _ = respond_to.send(());
            }

            ClaimCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.machine.snapshot());
            }
        }
    }

    async fn apply(&self, step: Step) {
        for transition in &step.transitions {
            self.record(transition);
        }

        for effect in step.effects {
            match effect {
                Effect::Notify(event) => event.deliver(self.outputs.sink.as_ref()),
                Effect::Cue(material) => self.outputs.cue.play(material),
                Effect::Release(artifact) => {
                    if let Err(e) = self.outputs.artifacts.release(artifact.clone()).await {
                        warn!(artifact = %artifact, "Failed to release artifact: {}", e);
                    }
                }
            }
        }
    }

    fn record(&self, transition: &Transition) {
        let metrics = &self.outputs.metrics;
        match transition {
            Transition::Suppressed => metrics.detection_suppressed(),
            Transition::Accepted(label) => {
                metrics.detection_accepted();
                debug!(label = %label, "Classification accepted");
            }
            Transition::Opened {
                claim_id,
                material,
                points,
            } => {
                metrics.claim_opened();
                info!(claim = %claim_id, material = %material, points, "Claim opened");
            }
            Transition::Ignored(material) => {
                debug!(material = %material, "Claim already outstanding, detection ignored");
            }
            Transition::GrantStarted(claim_id) => {
                debug!(claim = %claim_id, "Grant started");
            }
            Transition::Granted {
                claim_id,
                points,
                new_total,
            } => {
                metrics.claim_granted();
                info!(claim = %claim_id, points, new_total, "Claim granted");
            }
            Transition::InvalidCard(claim_id) => {
                metrics.invalid_card();
                info!(claim = %claim_id, "Card not registered, claim kept");
            }
            Transition::GrantFailed(claim_id) => {
                metrics.grant_failure();
                warn!(claim = %claim_id, "Grant failed, claim kept for retry");
            }
            Transition::TimedOut(claim_id) => {
                metrics.claim_timed_out();
                info!(claim = %claim_id, "Claim timed out");
            }
            Transition::ForceCleared(claim_id) => {
                metrics.claim_cleared();
                info!(claim = %claim_id, "Claim closed after prolonged emptiness");
            }
            Transition::NothingToClaim => debug!("Card presented with nothing to claim"),
            Transition::GrantBusy => debug!("Card presented while a grant is in flight"),
            Transition::StaleResolution(claim_id) => {
                warn!(claim = %claim_id, "Ignoring resolution for a claim that is not being granted");
            }
        }
    }
}
