//! Wires the claim actor and the input loops together and owns their tasks.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actor::{ClaimHandle, ClaimOutputs, DEFAULT_TICK, spawn_claim_actor};
use crate::claim::ClaimSettings;
use crate::collaborators::{
    ArtifactStore, CardReader, Classifier, CuePlayer, IdentityLookup, Ledger, TelemetrySource,
};
use crate::loops::{CardLoop, DEFAULT_FULL_THRESHOLD, DetectionLoop, GrantServices, TelemetryLoop};
use crate::metrics::KioskMetrics;
use crate::sink::{PresentationSink, Severity};
use crate::telemetry::{DEFAULT_SIGNIFICANT_DELTA, SignificantChangeFilter};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime knobs for the whole core.
#[derive(Clone, Debug)]
pub struct KioskSettings {
    pub claim: ClaimSettings,
    /// How often the claim actor checks the timeout
    pub tick: Duration,
    pub poll_interval: Duration,
    /// Upper bound for each identity, grant and telemetry call
    pub request_timeout: Duration,
    pub significant_delta: u8,
    pub full_threshold: u8,
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            claim: ClaimSettings::default(),
            tick: DEFAULT_TICK,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            significant_delta: DEFAULT_SIGNIFICANT_DELTA,
            full_threshold: DEFAULT_FULL_THRESHOLD,
        }
    }
}

/// Everything the core talks to. Missing input sources disable the loops
/// that need them; the rest keep running.
pub struct Collaborators {
    /// Sources that were configured but failed to start, with the error.
    /// Used as the disabled reason instead of "not configured".
    pub init_failures: Vec<(Component, String)>,
    pub classifier: Option<Arc<dyn Classifier>>,
    pub card_reader: Option<Box<dyn CardReader>>,
    pub identity: Option<Arc<dyn IdentityLookup>>,
    pub ledger: Option<Arc<dyn Ledger>>,
    pub telemetry: Option<Box<dyn TelemetrySource>>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub sink: Arc<dyn PresentationSink>,
    pub cue: Arc<dyn CuePlayer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Camera,
    CardReader,
    Telemetry,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Camera => "Camera",
            Component::CardReader => "Card reader",
            Component::Telemetry => "Telemetry",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ComponentStatus {
    Available,
    Disabled(String),
}

/// A running kiosk core.
pub struct Kiosk {
    claims: ClaimHandle,
    actor: JoinHandle<()>,
    loops: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    actor_stop: CancellationToken,
    components: Vec<(Component, ComponentStatus)>,
}

impl Kiosk {
    /// Spawn the claim actor and every input loop whose collaborators are
    /// present. Each input source reports its status to the sink once.
    ///
    /// Cancelling `cancel` stops the loops; [`Kiosk::shutdown`] does that and
    /// waits for everything to wind down.
    pub fn start(
        settings: KioskSettings,
        collaborators: Collaborators,
        metrics: Arc<KioskMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let Collaborators {
            init_failures,
            classifier,
            card_reader,
            identity,
            ledger,
            telemetry,
            artifacts,
            sink,
            cue,
        } = collaborators;

        let actor_stop = CancellationToken::new();
        let (claims, actor) = spawn_claim_actor(
            settings.claim.clone(),
            settings.tick,
            ClaimOutputs {
                sink: sink.clone(),
                artifacts,
                cue,
                metrics: metrics.clone(),
            },
            actor_stop.clone(),
        );

        let mut loops = Vec::new();
        let mut components = Vec::new();
        let disabled = |component: Component, fallback: &str| {
            let reason = init_failures
                .iter()
                .find(|(c, _)| *c == component)
                .map_or(fallback, |(_, reason)| reason.as_str());
            ComponentStatus::Disabled(reason.to_string())
        };

        match classifier {
            Some(classifier) => {
                let detection = DetectionLoop {
                    classifier,
                    claims: claims.clone(),
                    sink: sink.clone(),
                    metrics: metrics.clone(),
                    poll_interval: settings.poll_interval,
                };
                loops.push(tokio::spawn(detection.run(cancel.clone())));
                components.push((Component::Camera, ComponentStatus::Available));
            }
            None => components.push((
                Component::Camera,
                disabled(Component::Camera, "no classifier configured"),
            )),
        }

        match (card_reader, identity, ledger.clone()) {
            (Some(reader), Some(identity), Some(ledger)) => {
                let cards = CardLoop {
                    reader,
                    claims: claims.clone(),
                    services: GrantServices {
                        identity,
                        ledger,
                        request_timeout: settings.request_timeout,
                    },
                    sink: sink.clone(),
                };
                loops.push(tokio::spawn(cards.run(cancel.clone())));
                components.push((Component::CardReader, ComponentStatus::Available));
            }
            (None, _, _) => components.push((
                Component::CardReader,
                disabled(Component::CardReader, "no card reader configured"),
            )),
            (Some(_), None, _) => components.push((
                Component::CardReader,
                disabled(Component::CardReader, "no identity lookup configured"),
            )),
            (Some(_), Some(_), None) => components.push((
                Component::CardReader,
                disabled(Component::CardReader, "no ledger configured"),
            )),
        }

        match (telemetry, ledger) {
            (Some(source), Some(ledger)) => {
                let telemetry = TelemetryLoop {
                    source,
                    ledger,
                    sink: sink.clone(),
                    metrics: metrics.clone(),
                    filter: SignificantChangeFilter::new(settings.significant_delta),
                    request_timeout: settings.request_timeout,
                    full_threshold: settings.full_threshold,
                };
                loops.push(tokio::spawn(telemetry.run(cancel.clone())));
                components.push((Component::Telemetry, ComponentStatus::Available));
            }
            (None, _) => components.push((
                Component::Telemetry,
                disabled(Component::Telemetry, "no telemetry feed configured"),
            )),
            (Some(_), None) => components.push((
                Component::Telemetry,
                disabled(Component::Telemetry, "no ledger configured"),
            )),
        }

        for (component, status) in &components {
            match status {
                ComponentStatus::Available => {
                    info!("{} ready", component);
                    sink.on_status(&format!("{} ready", component), Severity::Info);
                }
                ComponentStatus::Disabled(reason) => {
                    warn!("{} disabled: {}", component, reason);
                    sink.on_status(
                        &format!("{} disabled: {}", component, reason),
                        Severity::Warning,
                    );
                }
            }
        }

        Self {
            claims,
            actor,
            loops,
            cancel,
            actor_stop,
            components,
        }
    }

    pub fn handle(&self) -> ClaimHandle {
        self.claims.clone()
    }

    pub fn components(&self) -> &[(Component, ComponentStatus)] {
        &self.components
    }

    /// Stop every loop, let in-flight grants resolve, then stop the claim
    /// actor so it releases any outstanding claim artifact.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.loops {
            if let Err(e) = task.await {
                warn!("Input loop ended abnormally: {}", e);
            }
        }

        self.actor_stop.cancel();
        drop(self.claims);
        if let Err(e) = self.actor.await {
            warn!("Claim actor ended abnormally: {}", e);
        }
        info!("Kiosk core stopped");
    }
}
